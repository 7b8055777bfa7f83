#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error object returned in an otherwise successful reply.
    #[error("{provider} API error [{code}]: {message}")]
    Api { provider: &'static str, code: String, message: String },

    #[error("received empty choices from {provider}")]
    EmptyChoices { provider: &'static str },

    #[error("choice with index 0 not found in {provider} response")]
    ChoiceNotFound { provider: &'static str },

    #[error("tool choice is forced but tool is not provided")]
    ForcedWithoutTools,

    #[error("only one allowed tool name can be configured")]
    TooManyAllowedTools,

    #[error("allowed tool name '{0}' not found in tools list")]
    UnknownAllowedTool(String),

    #[error("tool_choice 'allowed' is not supported when allowed tool names are present")]
    AllowedWithToolNames,

    #[error("no tools to bind")]
    NoToolsToBind,

    #[error("unsupported content part for {provider}: {part}")]
    UnsupportedPart { provider: &'static str, part: &'static str },

    #[error("missing credentials: set '{0}'")]
    MissingCredentials(&'static str),
}

impl Error {
    /// Numeric status carried in an API error code, if it looks like one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { code, .. } => code.parse().ok(),
            _ => None,
        }
    }
}
