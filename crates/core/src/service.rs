//! MedicationRequest transcoding service.
//!
//! Responsibilities:
//! - Run the `fhir` assembler with the startup configuration
//! - Report assembly diagnostics through `tracing`
//! - Hand assembled resources to a [`MedicationRequestStore`] and serialise what it returns
//!
//! Notes:
//! - Storage is a collaborator; this crate ships no implementation of it.

use crate::config::ServerConfig;
use crate::{CoreError, CoreResult};
use fhir::{Diagnostics, MedicationRequest, Transcoded};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Persistence for assembled MedicationRequests.
pub trait MedicationRequestStore: Send + Sync {
    /// Store a resource and return its id.
    fn insert(&self, resource: &MedicationRequest) -> CoreResult<String>;

    fn get_one(&self, id: &str) -> CoreResult<Option<MedicationRequest>>;

    fn get_all(&self) -> CoreResult<Vec<MedicationRequest>>;
}

/// Transcoding operations bound to one server configuration.
#[derive(Clone, Debug)]
pub struct TranscodingService {
    config: Arc<ServerConfig>,
}

impl TranscodingService {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Assemble a MedicationRequest from raw JSON and log its diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Fhir`] if the input is not a MedicationRequest object, or if a
    /// choice family is ambiguous under the reject policy.
    pub fn ingest(&self, raw: &Value) -> CoreResult<Transcoded> {
        let transcoded = MedicationRequest::deserialize(raw, &self.config.assembly_options())?;
        report(&transcoded.diagnostics);
        tracing::debug!(
            id = transcoded.resource.id().unwrap_or("<none>"),
            diagnostics = transcoded.diagnostics.len(),
            "assembled MedicationRequest"
        );
        Ok(transcoded)
    }

    /// Parse JSON text and assemble it.
    pub fn ingest_str(&self, text: &str) -> CoreResult<Transcoded> {
        let raw: Value = serde_json::from_str(text)
            .map_err(|err| CoreError::InvalidInput(format!("request body is not JSON: {err}")))?;
        self.ingest(&raw)
    }

    /// Assemble a resource and store it.
    ///
    /// # Returns
    ///
    /// The id the store assigned and the assembly diagnostics.
    pub fn insert(
        &self,
        store: &dyn MedicationRequestStore,
        raw: &Value,
    ) -> CoreResult<(String, Diagnostics)> {
        let Transcoded {
            resource,
            diagnostics,
        } = self.ingest(raw)?;
        let id = store.insert(&resource)?;
        tracing::debug!(%id, "stored MedicationRequest");
        Ok((id, diagnostics))
    }

    /// Fetch one stored resource as FHIR JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the store has no resource with `id`.
    pub fn get_one(
        &self,
        store: &dyn MedicationRequestStore,
        id: &str,
    ) -> CoreResult<Map<String, Value>> {
        let resource = store
            .get_one(id)?
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        Ok(resource.serialize()?)
    }

    /// Fetch every stored resource as FHIR JSON, in store order.
    pub fn get_all(&self, store: &dyn MedicationRequestStore) -> CoreResult<Vec<Map<String, Value>>> {
        store
            .get_all()?
            .iter()
            .map(|resource| resource.serialize().map_err(CoreError::from))
            .collect()
    }

    /// Render diagnostics as a MedicationRequest OperationOutcome.
    pub fn outcome(&self, diagnostics: &Diagnostics) -> Value {
        diagnostics.to_operation_outcome(fhir::medication_request::RESOURCE_TYPE)
    }
}

fn report(diagnostics: &Diagnostics) {
    for diagnostic in diagnostics {
        tracing::warn!(
            path = %diagnostic.path,
            kind = %diagnostic.kind,
            "MedicationRequest: {}",
            diagnostic.detail
        );
    }
}
