//! Warehouse stock (event-sourced).
//!
//! On-hand quantities per warehouse and product, moved only by document
//! transitions and never allowed below zero. Pure domain logic: no IO.

pub mod stock;

pub use stock::{MoveStock, StockCommand, StockEvent, StockMoved, StockMovement, WarehouseStock};
