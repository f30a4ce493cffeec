//! External football results: provider client, derivation rules, and the
//! scheduled sync task that keeps the fixtures table current.

pub mod client;
pub mod fetcher;
pub mod outcomes;

pub use fetcher::ResultsFetcher;
pub use outcomes::{derive_outcomes, DerivedOutcomes};
