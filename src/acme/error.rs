use std::time::Duration;

use thiserror::Error;

use super::problem::Problem;
use crate::cancel::Cancelled;

#[derive(Debug, Error)]
pub enum AcmeError {
    /// The CA rejected the request with a problem document. Never a bad-nonce
    /// problem: those are retried inside the request executor and only
    /// surface as [`AcmeError::RetryBudgetExhausted`].
    #[error("CA returned an error: {0}")]
    Problem(Problem),

    #[error("bad-nonce retries exhausted after {elapsed:?} ({attempts} attempts): {last}")]
    RetryBudgetExhausted {
        attempts: u32,
        elapsed: Duration,
        last: Problem,
    },

    #[error("http transport error: {0}")]
    Transport(#[source] Box<ureq::Error>),

    #[error("directory is missing the required {0} endpoint")]
    MissingEndpoint(&'static str),

    /// Renewal information was requested but the directory does not
    /// advertise the endpoint. Expected to be checked by callers, not
    /// treated as an anomaly.
    #[error("renewal information is not supported by this CA")]
    RenewalInfoNotSupported,

    /// A resource operation was handed an empty identifying URL. Fails
    /// locally, before any network call.
    #[error("{0} URL must not be empty")]
    EmptyUrl(&'static str),

    #[error("response is missing the {0} header")]
    MissingHeader(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    #[error("certificate parse error: {0}")]
    CertParse(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ureq::Error> for AcmeError {
    fn from(err: ureq::Error) -> Self {
        AcmeError::Transport(Box::new(err))
    }
}

impl From<Cancelled> for AcmeError {
    fn from(_: Cancelled) -> Self {
        AcmeError::Cancelled
    }
}
