//! DNS-01 challenge material and the provider seam.

pub mod solver;

pub use solver::{Dns01Solver, PreCheckFn};

use std::time::Duration;

use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// The key authorization for a challenge: `token "." jwk-thumbprint`
/// (RFC 8555 §8.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAuthorization(String);

impl KeyAuthorization {
    pub fn new(token: &str, thumbprint: &str) -> Self {
        Self(format!("{token}.{thumbprint}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The TXT record value for DNS-01: base64url of the SHA-256 digest of
    /// the key authorization (RFC 8555 §8.4).
    pub fn dns_value(&self) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(self.0.as_bytes()))
    }
}

/// Where challenge records get written. Implementations talk to a DNS
/// hosting API; everything network-shaped about them is their own business,
/// which is why the error type is `anyhow`.
///
/// `domain` is the identifier being validated, `record_fqdn` the owner name
/// the TXT record must appear at (CNAMEs already followed, trailing dot
/// included), `value` the record content.
pub trait DnsProvider {
    fn present(&self, domain: &str, record_fqdn: &str, value: &str) -> anyhow::Result<()>;

    fn clean_up(&self, domain: &str, record_fqdn: &str, value: &str) -> anyhow::Result<()>;

    /// Provider-specific propagation timeout and polling interval, when the
    /// hosting service is known to be slower or faster than the defaults.
    fn timeout(&self) -> Option<(Duration, Duration)> {
        None
    }

    /// Extra wait between records for providers that reject concurrent
    /// updates to one zone.
    fn sequential(&self) -> Option<Duration> {
        None
    }
}
