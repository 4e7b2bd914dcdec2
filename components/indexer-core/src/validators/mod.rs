//! Per-kind validation (spec 4.5). Deploy and bitmap validation are pure
//! predicates over already-classified content; mint validation orchestrates
//! gateway lookups, the two-tier cache, and the store, since it is the only
//! candidate kind whose acceptance depends on chain state beyond the
//! inscription's own content.

mod bitmap;
mod deploy;
mod mint;

pub use bitmap::validate_bitmap;
pub use deploy::validate_deploy;
pub use mint::{validate_mint, MintOutcome};

/// Outcome shared by the two pure validators. A `Skipped` deploy or bitmap
/// is logged and dropped, never retried (spec 4.5).
#[derive(Debug, Clone, PartialEq)]
pub enum Validated<T> {
    Accepted(T),
    Skipped(String),
}
