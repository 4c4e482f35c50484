//! network-discovery: policy-driven network scanning.
//!
//! Policies arrive over the HTTP control plane (or at boot from the
//! startup config), each one runs nmap on its own schedule, and every
//! responsive host is handed to the ingestion service.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod nmap_xml;
pub mod policy;
pub mod scanner;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;
