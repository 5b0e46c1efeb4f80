//! Request handlers for API endpoints

pub mod fhir;
pub mod system;
