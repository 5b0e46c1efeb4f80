//! COSRI FHIR gateway
//!
//! Backend between the clinical front-end and its upstream FHIR services:
//! - Session resolution over a signed browser cookie or an opaque keyed session
//! - Medication aggregation across the EMR, PDMP and PHR into one Bundle
//! - Drug-class annotation of medications via a cached RxNav lookup
//! - Pass-through of any other FHIR read to the session issuer

#![allow(clippy::large_enum_variant)]

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod request_context;
pub mod services;
pub mod session;
pub mod state;

pub use config::Config;
pub use error::{Error, Result};
pub use state::AppState;
