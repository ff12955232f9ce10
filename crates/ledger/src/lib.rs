//! Quantity ledger for document lines.
//!
//! Pure domain logic: deltas are applied to projected copies of lines and the
//! cross-field invariants are checked on the result. Nothing here persists;
//! the owning document commits the projected lines atomically with its status.

pub mod ledger;
pub mod line;

pub use ledger::{LedgerConflict, LedgerError, apply_delta, apply_deltas, check_line};
pub use line::{DocumentLine, LineDelta, LineLimits, QuantityField};
