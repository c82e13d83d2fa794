use crate::config::ConfigError;
use thiserror::Error;

/// Failures reported by an [`IdentityProvider`](super::IdentityProvider).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// No signed-in user or the session can no longer be refreshed.
    #[error("user is not signed in")]
    NotAuthenticated,
    /// The provider understood the request and refused it.
    #[error("{message}")]
    Rejected { code: String, message: String },
    /// The redirect came back with an OAuth error or without a usable code.
    #[error("Authentication error: {error} ({})", .description.as_deref().unwrap_or("no details"))]
    Callback {
        error: String,
        description: Option<String>,
    },
    #[error("network error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ProviderError {
    pub(crate) fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Provider error code (`UsernameExistsException`, ...), when there is one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Errors surfaced by the workflows to the person driving them. None of them
/// are fatal; each leaves its workflow in a safe state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Local input check; the provider was not contacted.
    #[error("{0}")]
    Validation(String),
    /// Provider failure with a local prefix and the provider's own message.
    #[error("{context}: {message}")]
    Provider {
        context: &'static str,
        message: String,
    },
    /// The operation does not apply to the current phase.
    #[error("{0}")]
    InvalidState(&'static str),
}

impl AuthError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn provider(context: &'static str, err: &ProviderError) -> Self {
        Self::Provider {
            context,
            message: err.to_string(),
        }
    }
}
