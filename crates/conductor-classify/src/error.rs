use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("no OpenRouter API key configured")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}
