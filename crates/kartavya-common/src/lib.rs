//! Shared domain types for Kartavya.
//!
//! `models` holds the entities and view types exchanged over the API,
//! `envelope` the single response shape every JSON endpoint returns.

pub mod envelope;
pub mod models;

pub use envelope::ApiResponse;
