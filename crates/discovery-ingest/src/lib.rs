//! discovery-ingest: delivery of discovered entities to the upstream system.
//!
//! Discovery runs talk to the upstream only through the [`IngestClient`]
//! trait, so tests and alternate transports can stand in for the HTTP
//! client shipped here.

pub mod client;
pub mod http;

pub use client::{IngestClient, IngestError, IngestResponse};
pub use http::{HttpIngestClient, IngestConfig};
