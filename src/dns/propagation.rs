//! Propagation checking: poll until every consulted nameserver serves the
//! expected challenge TXT record.

use std::time::{Duration, Instant};

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{Name, RecordType};
use log::{debug, info};

use super::error::DnsError;
use super::query::{WireClient, ensure_port, rcode_name, txt_value};
use super::zone::ZoneResolver;
use crate::cancel::CancelToken;

/// DNS-01 resolution settings. The two `require_*` flags are independent:
/// recursive resolvers confirm public visibility, the zone's own
/// authoritative servers confirm the record actually landed. Both default
/// on; disabling both turns the propagation wait into a no-op.
#[derive(Debug, Clone)]
pub struct Dns01Config {
    pub recursive_nameservers: Vec<String>,
    pub require_recursive: bool,
    pub require_authoritative: bool,
    /// Port used when querying discovered authoritative nameservers.
    pub authoritative_port: u16,
    pub propagation_timeout: Duration,
    pub polling_interval: Duration,
    pub query_timeout: Duration,
}

impl Default for Dns01Config {
    fn default() -> Self {
        Self {
            recursive_nameservers: vec!["8.8.8.8:53".to_string(), "1.1.1.1:53".to_string()],
            require_recursive: true,
            require_authoritative: true,
            authoritative_port: 53,
            propagation_timeout: Duration::from_secs(60),
            polling_interval: Duration::from_secs(2),
            query_timeout: Duration::from_secs(10),
        }
    }
}

/// Checks that a TXT record has propagated to every nameserver that matters.
#[derive(Debug)]
pub struct PropagationChecker {
    config: Dns01Config,
    wire: WireClient,
    zones: ZoneResolver,
}

impl PropagationChecker {
    pub fn new(config: Dns01Config) -> Self {
        let zones = ZoneResolver::with_timeout(
            config.recursive_nameservers.clone(),
            config.query_timeout,
        );
        let wire = WireClient::new(config.query_timeout);
        Self {
            config,
            wire,
            zones,
        }
    }

    pub fn config(&self) -> &Dns01Config {
        &self.config
    }

    pub fn zones(&self) -> &ZoneResolver {
        &self.zones
    }

    /// One propagation probe. Every consulted server must serve the expected
    /// value; the first one that does not names itself in the error.
    ///
    /// The queried name may be aliased into another zone, so the CNAME chain
    /// is followed first: both the TXT lookups and the zone discovery for the
    /// authoritative leg target the end of the chain.
    pub fn check(&self, record_fqdn: &str, expected: &str) -> Result<(), DnsError> {
        if !self.config.require_recursive && !self.config.require_authoritative {
            return Ok(());
        }
        let record_fqdn = self.zones.follow_cnames(record_fqdn)?;
        if self.config.require_recursive {
            for server in &self.config.recursive_nameservers {
                self.require_value(server, &record_fqdn, expected, true)?;
            }
        }
        if self.config.require_authoritative {
            let zone = self.zones.find_zone_by_fqdn(&record_fqdn)?;
            for host in self.zones.authoritative_nameservers(&zone)? {
                let server = ensure_port(&host, self.config.authoritative_port);
                self.require_value(&server, &record_fqdn, expected, false)?;
            }
        }
        Ok(())
    }

    /// Polls [`PropagationChecker::check`] until it passes, the timeout
    /// elapses, or the token cancels.
    pub fn wait_for_propagation(
        &self,
        record_fqdn: &str,
        expected: &str,
        cancel: &CancelToken,
    ) -> Result<(), DnsError> {
        let started = Instant::now();
        loop {
            cancel.check()?;
            match self.check(record_fqdn, expected) {
                Ok(()) => {
                    info!(
                        "[dns] {record_fqdn} propagated after {:?}",
                        started.elapsed()
                    );
                    return Ok(());
                }
                Err(DnsError::Cancelled) => return Err(DnsError::Cancelled),
                Err(err) => {
                    if started.elapsed() >= self.config.propagation_timeout {
                        return Err(DnsError::PropagationTimeout {
                            fqdn: record_fqdn.to_string(),
                            elapsed: started.elapsed(),
                            last: Box::new(err),
                        });
                    }
                    debug!(
                        "[dns] {record_fqdn} not propagated yet ({err}), retrying in {:?}",
                        self.config.polling_interval
                    );
                    sleep_within(self.config.polling_interval, cancel);
                }
            }
        }
    }

    fn require_value(
        &self,
        server: &str,
        record_fqdn: &str,
        expected: &str,
        recursion: bool,
    ) -> Result<(), DnsError> {
        let observed = self.lookup_txt(server, record_fqdn, recursion)?;
        if observed.iter().any(|value| value == expected) {
            return Ok(());
        }
        Err(DnsError::PropagationMismatch {
            server: server.to_string(),
            fqdn: record_fqdn.to_string(),
            expected: expected.to_string(),
            observed: observed.join(", "),
        })
    }

    fn lookup_txt(
        &self,
        server: &str,
        record_fqdn: &str,
        recursion: bool,
    ) -> Result<Vec<String>, DnsError> {
        let name = Name::from_ascii(record_fqdn)?;
        let servers = [server.to_string()];
        let response = self.wire.query(&servers, &name, RecordType::TXT, recursion)?;
        match response.response_code() {
            // NXDOMAIN just means the record has not landed yet.
            ResponseCode::NoError | ResponseCode::NXDomain => Ok(response
                .answers()
                .iter()
                .filter_map(|record| txt_value(record.data()))
                .collect()),
            other => Err(DnsError::UnexpectedRcode {
                domain: record_fqdn.to_string(),
                rcode: rcode_name(other),
            }),
        }
    }
}

pub(crate) fn sleep_within(wait: Duration, cancel: &CancelToken) {
    let wait = match cancel.remaining() {
        Some(remaining) => wait.min(remaining),
        None => wait,
    };
    if !wait.is_zero() {
        std::thread::sleep(wait);
    }
}
