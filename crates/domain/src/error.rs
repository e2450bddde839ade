/// Shared error type used across all Parley crates.
///
/// The variants mirror the failure taxonomy observed by clients: every
/// failed turn ends with exactly one `error` envelope whose `kind` field
/// is the stable string returned by [`Error::kind`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP-level failure talking to the LLM endpoint (connect, TLS, reset).
    #[error("transport: {0}")]
    Transport(String),

    /// The LLM stream produced a line we could not decode.
    #[error("decode: {0}")]
    Decode(String),

    /// The LLM endpoint answered with a non-success status code.
    #[error("model returned HTTP {status}: {message}")]
    ModelHttp { status: u16, message: String },

    /// Tool arguments failed validation against the declared schema.
    #[error("tool schema: {0}")]
    ToolSchema(String),

    /// The tool body itself failed.
    #[error("tool runtime: {0}")]
    ToolRuntime(String),

    /// The tool/LLM iteration bound was exhausted.
    #[error("tool loop limit reached ({0} iterations)")]
    MaxIterations(usize),

    /// The overall turn deadline expired.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The turn was stopped by a client signal.
    #[error("generation cancelled")]
    Cancelled,

    /// The user submitted an empty message.
    #[error("empty input")]
    EmptyInput,

    /// Summarization failed while the session is already over budget.
    #[error("context overflow: {0}")]
    ContextOverflow(String),

    /// A database write or commit failed.
    #[error("persistence: {0}")]
    Persistence(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("config: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable kind string, used in `error` event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "decode",
            Error::Transport(_) => "transport",
            Error::Decode(_) => "decode",
            Error::ModelHttp { .. } => "transport",
            Error::ToolSchema(_) => "tool_schema",
            Error::ToolRuntime(_) => "tool_runtime",
            Error::MaxIterations(_) => "max_iterations",
            Error::Timeout(_) => "timeout",
            Error::Cancelled => "cancelled",
            Error::EmptyInput => "empty_input",
            Error::ContextOverflow(_) => "context_overflow",
            Error::Persistence(_) => "persistence",
            Error::Auth(_) => "auth",
            Error::Config(_) => "config",
            Error::NotFound(_) => "not_found",
            Error::Other(_) => "internal",
        }
    }

    /// True when the content streamed before the failure is still valid
    /// for the client to keep (partial-output failures).
    pub fn partial_content_valid(&self) -> bool {
        matches!(
            self,
            Error::MaxIterations(_) | Error::Timeout(_) | Error::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(Error::Transport("x".into()).kind(), "transport");
        assert_eq!(
            Error::ModelHttp {
                status: 502,
                message: "bad gateway".into()
            }
            .kind(),
            "transport"
        );
        assert_eq!(Error::MaxIterations(50).kind(), "max_iterations");
        assert_eq!(Error::Cancelled.kind(), "cancelled");
        assert_eq!(Error::Persistence("commit".into()).kind(), "persistence");
    }

    #[test]
    fn partial_content_rules() {
        assert!(Error::Cancelled.partial_content_valid());
        assert!(Error::Timeout("turn".into()).partial_content_valid());
        assert!(Error::MaxIterations(50).partial_content_valid());
        assert!(!Error::Transport("reset".into()).partial_content_valid());
        assert!(!Error::Persistence("commit".into()).partial_content_valid());
    }
}
