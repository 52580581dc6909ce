//! # MedReq Core
//!
//! Runtime services around the `fhir` transcoding engine.
//!
//! This crate contains:
//! - Server configuration resolved once at startup ([`ServerConfig`])
//! - The transcoding service that runs the assembler and logs its diagnostics
//! - The persistence collaborator interface ([`MedicationRequestStore`])
//!
//! **No transport concerns**: HTTP routing, authentication and storage backends live
//! outside this crate.

pub mod config;
pub mod error;
pub mod service;

pub use config::{ConfigOverrides, ServerConfig};
pub use error::{CoreError, CoreResult};
pub use service::{MedicationRequestStore, TranscodingService};
