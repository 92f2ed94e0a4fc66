// Generation orchestration: cache → backend → parse/salvage → reference
// resolution → cache write. All backend calls go through `llm_client`.

pub mod generator;
pub mod handlers;
pub mod prompts;
pub mod shapes;
pub mod single_flight;

use thiserror::Error;

use crate::llm_client::BackendError;
use crate::salvage::SalvageError;

pub use generator::{GeneratedRecord, GenerationRequest, Orchestrator};
pub use shapes::{RecordKind, TtlClass};

/// Why a generation call produced no record. Only this error class reaches
/// the user; classification and cache failures degrade instead.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Generation backend returned an empty response")]
    EmptyResponse,

    #[error(transparent)]
    Parse(#[from] SalvageError),

    #[error("Generated record is missing required field '{0}'")]
    MissingField(String),

    #[error("Generated record has no complete '{0}' element")]
    NoCompleteElements(String),

    #[error("Generated record is not a JSON object")]
    NotAnObject,
}

impl GenerationError {
    /// Transport-category failures: the backend never produced usable text.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            GenerationError::Backend(BackendError::Transport(_)) | GenerationError::EmptyResponse
        )
    }
}
