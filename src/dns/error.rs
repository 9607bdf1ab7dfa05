use std::time::Duration;

use crate::cancel::Cancelled;

#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    #[error("no nameservers configured")]
    NoNameserversConfigured,

    #[error("all nameservers failed, last error: {last}")]
    AllNameserversFailed { last: String },

    #[error("could not find the start of authority for {fqdn}")]
    NoSoaFound { fqdn: String },

    #[error("unexpected response code {rcode} querying {domain}")]
    UnexpectedRcode { domain: String, rcode: String },

    #[error("no authoritative nameservers found for zone {zone}")]
    NoNameservers { zone: String },

    #[error(
        "nameserver {server} does not yet serve the expected TXT record for {fqdn}: \
         expected {expected}, observed [{observed}]"
    )]
    PropagationMismatch {
        server: String,
        fqdn: String,
        expected: String,
        observed: String,
    },

    #[error("timed out after {elapsed:?} waiting for {fqdn} to propagate: {last}")]
    PropagationTimeout {
        fqdn: String,
        elapsed: Duration,
        last: Box<DnsError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("dns protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Cancelled> for DnsError {
    fn from(_: Cancelled) -> Self {
        DnsError::Cancelled
    }
}
