/// Errors observed by the reconnect machinery. None of these reach
/// listener callbacks; every one of them feeds the backoff-and-resync
/// cycle.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("server returned status {0}")]
    Status(u16),
    #[error("stream interrupted: {0}")]
    Interrupted(String),
}

impl ClientError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Status(_) => "status",
            Self::Interrupted(_) => "interrupted",
        }
    }
}
