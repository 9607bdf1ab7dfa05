//! DNS plumbing for the DNS-01 challenge: wire queries, zone-apex
//! discovery, CNAME following, nameserver discovery, and propagation
//! checking.

pub mod cname;
pub mod error;
pub mod nameserver;
pub mod propagation;
pub mod query;
pub mod zone;

pub use cname::{MAX_CNAME_DEPTH, follow_cnames_with};
pub(crate) use propagation::sleep_within;
pub use error::DnsError;
pub use propagation::{Dns01Config, PropagationChecker};
pub use query::{WireClient, ensure_port};
pub use zone::ZoneResolver;
