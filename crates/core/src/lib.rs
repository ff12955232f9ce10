//! `tallyerp-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the error taxonomy shared by every document action, the
//! aggregate traits, and decimal quantity helpers.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod quantity;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{ConflictDetail, ConflictKind, DomainError, DomainResult, StateViolation};
pub use id::{AggregateId, CompanyId, ProductId, TenantId, UserId, WarehouseId};
pub use quantity::{Quantity, QuantityRange};
