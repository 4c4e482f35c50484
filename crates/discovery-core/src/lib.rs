//! discovery-core: Shared policy and entity types for network discovery.
//!
//! This crate provides the data model exchanged between the discovery
//! engine and the ingestion client:
//! - Policy documents (schedule, scope, default metadata)
//! - Entities produced by a scan and handed upstream

pub mod policy;
pub mod types;

pub use policy::{Defaults, Policy, PolicyConfig, Scope};
pub use types::{Entity, IpAddress};
