//! Database layer: error classification, row models, and per-entity repositories.

pub mod errors;
pub mod handlers;
pub mod models;
