pub mod backend;
pub mod builder;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod metrics;
pub mod params;
pub mod predicate;
pub mod server;
pub mod status;
pub mod store;
pub mod template;

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("Unsupported usage: {0}")]
    UnsupportedUsage(String),
    #[error("Parameter mismatch: missing {missing:?}, unexpected {unexpected:?}")]
    ParameterMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error("Template error: {0}")]
    Template(String),
    #[error("Rendered spec is invalid: {0}")]
    RenderedSpecInvalid(#[source] serde_json::Error),
    #[error("Conversion error: {0}")]
    Conversion(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Transient store error: {message}")]
    TransientStore {
        message: String,
        requeue_after: Duration,
    },
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors caused by the resource content itself. Retrying without a spec
    /// change cannot succeed, so these are recorded as `MalformedSpec`.
    pub fn is_malformed_spec(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedUsage(_)
                | Error::ParameterMismatch { .. }
                | Error::Template(_)
                | Error::RenderedSpecInvalid(_)
                | Error::Conversion(_)
                | Error::Validation(_)
        )
    }

    /// Delay requested by the failing operation, if any.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Error::TransientStore { requeue_after, .. } => Some(*requeue_after),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_spec_classification() {
        assert!(Error::Template("bad".into()).is_malformed_spec());
        assert!(Error::ParameterMismatch {
            missing: vec!["p2".into()],
            unexpected: vec![],
        }
        .is_malformed_spec());
        assert!(!Error::Backend("503".into()).is_malformed_spec());
        assert!(!Error::TransientStore {
            message: "conflict".into(),
            requeue_after: Duration::from_secs(30),
        }
        .is_malformed_spec());
    }

    #[test]
    fn transient_store_carries_requeue() {
        let err = Error::TransientStore {
            message: "conflict".into(),
            requeue_after: Duration::from_secs(30),
        };
        assert_eq!(err.requeue_after(), Some(Duration::from_secs(30)));
        assert_eq!(Error::Backend("x".into()).requeue_after(), None);
    }
}
