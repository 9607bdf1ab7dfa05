//! RFC 7807 problem documents as returned by ACME servers.

use serde::{Deserialize, Serialize};
use std::fmt;

const BAD_NONCE: &str = "urn:ietf:params:acme:error:badNonce";

/// An error document from the CA (RFC 8555 §6.7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub subproblems: Vec<Subproblem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subproblem {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl Problem {
    /// Whether the CA rejected the anti-replay nonce. This is the only error
    /// class the request executor retries: re-signing the same idempotent
    /// body with a fresh nonce cannot change its effect.
    pub fn is_bad_nonce(&self) -> bool {
        self.kind.as_deref() == Some(BAD_NONCE)
    }

    /// Builds a problem from a non-2xx response body, falling back to the
    /// raw body text when it is not a problem document.
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<Problem>(body) {
            Ok(mut problem) => {
                problem.status.get_or_insert(status);
                problem
            }
            Err(_) => Problem {
                kind: None,
                detail: Some(body.trim().to_string()).filter(|d| !d.is_empty()),
                status: Some(status),
                subproblems: Vec::new(),
            },
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.detail, self.status) {
            (Some(kind), Some(detail), _) => write!(f, "{kind}: {detail}")?,
            (Some(kind), None, _) => write!(f, "{kind}")?,
            (None, Some(detail), _) => write!(f, "{detail}")?,
            (None, None, Some(status)) => write!(f, "HTTP {status}")?,
            (None, None, None) => write!(f, "unknown problem")?,
        }
        for sub in &self.subproblems {
            if let Some(detail) = &sub.detail {
                write!(f, "; {detail}")?;
            }
        }
        Ok(())
    }
}
