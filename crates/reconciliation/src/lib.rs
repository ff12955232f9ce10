//! Cross-document quantity validation.
//!
//! Every check here is pure: it reads line totals and a resolved tolerance and
//! either passes or describes the breach. Nothing is ever clamped.

pub mod matching;
pub mod policy;
pub mod receipt;

pub use matching::three_way_match;
pub use policy::InvoiceControlPolicy;
pub use receipt::{check_over_delivery, check_receipt, line_limits};
