//! ACME (RFC 8555) client engine with DNS-01 challenge resolution.
//!
//! Two subsystems do the heavy lifting:
//!
//! - the signed-request pipeline ([`acme`]): directory bootstrap, JWS
//!   envelopes, the anti-replay nonce lifecycle, and a retry policy that
//!   recovers from stale nonces while treating everything else as terminal;
//! - the DNS-01 resolution engine ([`dns`]): authoritative-zone discovery by
//!   walking the label hierarchy, CNAME following, nameserver discovery, and
//!   a propagation pre-check that requires every configured resolver to
//!   agree before a challenge is declared ready.
//!
//! The [`challenge`] module ties both together: it computes the key
//! authorization, hands the TXT record to a caller-supplied
//! [`challenge::DnsProvider`], waits for propagation, and notifies the CA.

pub mod acme;
pub mod cancel;
pub mod challenge;
pub mod dns;
pub mod fqdn;

pub use acme::client::{AcmeClient, RetryPolicy};
pub use acme::error::AcmeError;
pub use cancel::CancelToken;
pub use challenge::solver::Dns01Solver;
pub use challenge::{DnsProvider, KeyAuthorization};
pub use dns::error::DnsError;
pub use dns::propagation::{Dns01Config, PropagationChecker};
pub use dns::zone::ZoneResolver;
