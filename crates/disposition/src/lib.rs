//! Tracking of what happens to rejected goods-receipt quantities.
//!
//! One record per goods receipt line with a rejected quantity. The record is
//! independent from the receipt's status and is never deleted.

pub mod record;

pub use record::{
    Disposition, DispositionCommand, DispositionEvent, DispositionHistoryEntry, DispositionOpened,
    DispositionRecord, DispositionResolved, DispositionUpdated, OpenDisposition,
    ResolveDisposition, UpdateDisposition,
};
