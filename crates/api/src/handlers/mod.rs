//! API handlers for all routes
//!
//! One module per resource, each exposing a `Router<AppState>` builder that
//! main.rs nests under `/api`.

pub mod activities;
pub mod alerts;
pub mod dashboard;
pub mod incidents;
pub mod ingest;
pub mod threats;
pub mod users;
