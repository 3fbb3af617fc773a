use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    /// The compact serialization could not be split or decoded
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// No strategy or implementation exists for the requested algorithm
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A parameter (key, algorithm, length) is not acceptable for the operation
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A binary structure (Token Binding message) is truncated or inconsistent
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
