use thiserror::Error;

/// Result type alias for mailbox operations
pub type MailboxResult<T> = Result<T, MailboxError>;

/// Error types for remote mailbox operations
#[derive(Error, Debug)]
pub enum MailboxError {
    /// Request could not be sent through the middleware stack
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest_middleware::Error),

    /// Network or body decoding error from the HTTP client
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The mailbox rejected the credentials
    #[error("Unauthorized: the mailbox rejected the access token")]
    Unauthorized,

    /// The requested message or attachment does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other non-success status
    #[error("Mailbox returned status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },

    /// The response could not be mapped onto the mailbox data model
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Credentials are missing, expired or unreadable
    #[error("Invalid credentials: {0}")]
    Credentials(String),
}
