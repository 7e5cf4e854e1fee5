use thiserror::Error;

use crate::consts::{MAX_PROMPT_CHARS, MAX_TOKENS_CEILING};
use crate::models::ModelConfigId;

/// Reasons a submission is rejected before it reaches the queue.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("a valid user is required")]
    InvalidUser,

    #[error("a valid AI model must be selected")]
    InvalidModel,

    #[error("prompt text is required")]
    EmptyPrompt,

    #[error("prompt is {0} characters, the limit is {max}", max = MAX_PROMPT_CHARS)]
    PromptTooLong(usize),

    #[error("max tokens must be between 1 and {max}, got {0}", max = MAX_TOKENS_CEILING)]
    MaxTokensOutOfRange(u32),

    #[error("temperature must be between 0.0 and 2.0, got {0}")]
    TemperatureOutOfRange(f64),

    #[error("AI model configuration {0} not found")]
    ModelNotFound(ModelConfigId),

    #[error("AI model configuration {0} is not active")]
    ModelInactive(ModelConfigId),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SubmitError {
    /// `true` for problems with the caller's input, as opposed to storage failures.
    pub fn is_validation(&self) -> bool {
        !matches!(self, SubmitError::Storage(_))
    }
}
