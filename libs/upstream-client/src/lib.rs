//! Upstream HTTP client for the COSRI gateway
//!
//! This crate provides the async fetch wrapper used for every outbound call the
//! gateway makes (EMR, PDMP, PHR and the RxNav drug-class API), plus the
//! header forwarding policy applied to those calls.
//!
//! # Examples
//!
//! ## Fetch a FHIR search (async)
//!
//! ```rust,no_run
//! use cosri_upstream::{UpstreamClient, UpstreamClientConfig};
//! use cosri_upstream::header::HeaderMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = UpstreamClient::new(UpstreamClientConfig::default())?;
//! let response = client
//!     .fetch(
//!         "https://emr.example/fhir/MedicationRequest",
//!         &[("subject".to_string(), "Patient/42".to_string())],
//!         &HeaderMap::new(),
//!     )
//!     .await?;
//! assert_eq!(response.body["resourceType"], "Bundle");
//! # Ok(())
//! # }
//! ```
//!
//! ## Look up drug classes (async)
//!
//! ```rust,no_run
//! use cosri_upstream::{DrugClassClient, UpstreamClient, UpstreamClientConfig, RXNAV_BASE_URL};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let upstream = UpstreamClient::new(UpstreamClientConfig::default())?;
//! let rxnav = DrugClassClient::new(upstream, RXNAV_BASE_URL);
//! let class_ids = rxnav.class_ids_by_rxcui("854873").await?;
//! # Ok(())
//! # }
//! ```
//!
pub mod client;
pub mod error;
pub mod headers;
pub mod models;
pub mod rxnav;

pub use client::{build_url, UpstreamClient, UpstreamClientConfig, UpstreamResponse};
pub use error::{Error, Result};
pub use headers::{bearer, HeaderAllowList};
pub use models::{ClassConcept, ClassLookupParams};
pub use rxnav::{DrugClassClient, RXNAV_BASE_URL};

// Re-export header types so callers share one `http` version with this crate
pub use reqwest::header;
