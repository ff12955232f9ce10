//! Infrastructure layer: event store, tolerance store, dispatcher and the
//! document engine that ties the domain crates together.

pub mod command_dispatcher;
pub mod config;
pub mod directory;
pub mod engine;
pub mod event_store;
pub mod tolerance_store;

#[cfg(test)]
mod integration_tests;
