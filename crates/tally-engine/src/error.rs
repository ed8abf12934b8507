use tally_core::PipelineError;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("malformed password hash")]
    Malformed,

    #[error("hash worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token signing failed: {0}")]
    Sign(String),
}

impl From<HashError> for PipelineError {
    fn from(e: HashError) -> Self {
        PipelineError::Internal(e.to_string())
    }
}

impl From<TokenError> for PipelineError {
    fn from(e: TokenError) -> Self {
        PipelineError::Internal(e.to_string())
    }
}
