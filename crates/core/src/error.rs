use fhir::FhirError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to read configuration file: {0}")]
    ConfigRead(std::io::Error),
    #[error("FHIR error: {0}")]
    Fhir(#[from] FhirError),
    #[error("store error: {0}")]
    Store(String),
    #[error("MedicationRequest not found: {0}")]
    NotFound(String),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
