//! logsnarf: multi-tenant syslog ingestion.
//!
//! Tenants are identified by an opaque token that resolves, through a
//! bounded cache in front of a durable credential store, to the destination
//! database their metrics are written to.

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod destination;
pub mod errors;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod resolver;
