//! Scene classification collaborator

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tether_api::SceneCategory;
use thiserror::Error;

/// Why a classification attempt produced no verdict
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Classifier not configured: {0}")]
    NotConfigured(String),

    #[error("Classifier request timed out")]
    Timeout,

    #[error("Classifier returned HTTP {0}")]
    Status(u16),

    #[error("Classifier transport error: {0}")]
    Transport(String),

    #[error("Unparsable classifier response: {0}")]
    Parse(String),
}

pub type ClassifierResult<T> = Result<T, ClassifierError>;

/// Structured answer from the classification service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneVerdict {
    pub verified: bool,
    pub message: String,
}

/// Remote service that answers "does this image show <category>?"
#[async_trait]
pub trait SceneClassifier: Send + Sync {
    async fn classify(
        &self,
        image_jpeg: &[u8],
        scene: SceneCategory,
    ) -> ClassifierResult<SceneVerdict>;
}
