//! Error taxonomy for the scraper core.
//!
//! A single typed error carries a `kind` and a `retryable` flag so the
//! Retry Executor and the CLI can dispatch on it without exception-style
//! inheritance. Adapters and storage backends still use `anyhow::Context`
//! at their call sites and convert into `ScraperError` at component
//! boundaries.

use thiserror::Error;

/// Abstract error kind from spec.md §7. Concrete representation only;
/// adapters map their own failure modes onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    AuthConfig,
    ParseSchema,
    Validation,
    Anomaly,
    CacheStateStore,
    Dispatch,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::AuthConfig => "auth_config",
            Self::ParseSchema => "parse_schema",
            Self::Validation => "validation",
            Self::Anomaly => "anomaly",
            Self::CacheStateStore => "cache_state_store",
            Self::Dispatch => "dispatch",
        }
    }
}

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("transport error in {component}: {message}")]
    Transport { component: String, message: String },

    #[error("auth/config error in {component}: {message}")]
    AuthConfig { component: String, message: String },

    #[error("parse/schema error in {component}: {message}")]
    ParseSchema { component: String, message: String },

    #[error("validation rejected in {component}: {message}")]
    Validation { component: String, message: String },

    #[error("cache/state-store error in {component}: {message}")]
    CacheStateStore { component: String, message: String },

    #[error("dispatch error on channel {channel}: {message}")]
    Dispatch { channel: String, message: String },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ScraperError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::AuthConfig { .. } => ErrorKind::AuthConfig,
            Self::ParseSchema { .. } => ErrorKind::ParseSchema,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::CacheStateStore { .. } => ErrorKind::CacheStateStore,
            Self::Dispatch { .. } => ErrorKind::Dispatch,
            Self::Other(_) => ErrorKind::Transport,
        }
    }

    /// Whether the Retry Executor should retry this error.
    /// Retryable set = network/timeout/5xx/429; non-retryable = schema/parse/auth.
    pub fn retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::CacheStateStore)
    }

    pub fn transport(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn auth_config(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AuthConfig {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn parse_schema(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseSchema {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn validation(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn cache_state_store(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CacheStateStore {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn dispatch(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dispatch {
            channel: channel.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScraperError>;
