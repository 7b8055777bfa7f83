use crate::Role;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A failure worth retrying, such as a rate limit or a dropped
    /// connection. Displays the whole chain of the wrapped error.
    #[error("{0:#}")]
    Retryable(anyhow::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("cannot concat messages with different roles: {expected} and {actual}")]
    RoleMismatch { expected: Role, actual: Role },

    #[error("no messages to concat")]
    EmptyConcat,
}

impl Error {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context as _;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_retryable_keeps_context_chain() {
        let inner = Err::<(), _>(Error::HttpStatus { status: 503, body: "busy".to_string() })
            .context("POST http://localhost/chat [503 Service Unavailable]")
            .unwrap_err();

        let actual = anyhow::Error::from(Error::Retryable(inner));

        assert_eq!(
            format!("{actual:#}"),
            "POST http://localhost/chat [503 Service Unavailable]: HTTP 503: busy"
        );
    }
}
