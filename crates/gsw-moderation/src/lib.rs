//! Log classification and the ban registry.

pub mod classify;
pub mod registry;
pub mod rules;

pub use classify::{Classified, KnownPlayerResolver, classify};
pub use registry::{BanRecord, BanRegistry};
pub use rules::ForbiddenRule;
