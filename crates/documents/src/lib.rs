//! Document state machine (event-sourced).
//!
//! Every document type (orders, receipts, invoices, deliveries, stock
//! movements) is one `Document` aggregate parameterised by `DocumentType`.
//! Allowed transitions are declared per type in [`transitions`]; guards in
//! [`guards`] run on the projected document before anything is emitted.

pub mod document;
pub mod guards;
pub mod transitions;
pub mod types;

pub use document::{
    ApplyLineDeltas, ApplyTransition, CreateDocument, Document, DocumentCommand, DocumentCreated,
    DocumentEvent, DocumentHeader, DocumentTransitioned, LineQuantitiesAdjusted, NewLine,
    TransitionPayload, TransitionReceipt,
};
pub use transitions::{Edge, available_actions, edges, has_edge, initial_status, is_terminal, target};
pub use types::{Action, DocumentStatus, DocumentType};
