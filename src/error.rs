use thiserror::Error;

#[derive(Error, Debug)]
pub enum PilotError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Model overloaded after {attempts} attempts. Last error: {last_error}")]
    Overloaded { attempts: u32, last_error: String },

    #[error("Malformed LLM response: {0}")]
    MalformedResponse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Connection state error: {0}")]
    Connection(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PilotError>;
