//! Relational persistence for mirrored chain state, fixtures, and cycles.
//!
//! All access goes through parameterised queries in [`store`]. Mutations
//! that belong to one indexed window run inside a single transaction with
//! the stream cursor advance, so a handler failure rolls the whole window
//! back. Per-pool writes are serialised with `pg_advisory_xact_lock`.

pub mod models;
pub mod schema;
pub mod store;

pub use store::Store;
