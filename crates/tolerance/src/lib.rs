//! Receipt/delivery tolerance settings and their resolution.
//!
//! A setting widens the acceptable quantity window around an ordered quantity
//! by an under- and over-percentage. Settings exist at product, category and
//! company level; the most specific active one wins.

pub mod resolver;
pub mod setting;
pub mod window;

pub use resolver::{ResolvedFrom, ResolvedTolerance, resolve};
pub use setting::{ToleranceId, ToleranceLevel, ToleranceSetting, ToleranceUpdate, ensure_unique};
pub use window::ToleranceWindow;
