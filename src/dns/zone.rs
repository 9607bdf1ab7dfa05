//! Zone-apex discovery: walk the labels of a name upward, asking the
//! recursive resolvers for a SOA at each level, until the zone cut is found.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{Name, RData, RecordType};
use log::debug;

use super::error::DnsError;
use super::query::{WireClient, has_cname_at, rcode_name};
use crate::fqdn::to_fqdn;

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// A SOA lookup result cached until the record's refresh interval elapses.
#[derive(Debug, Clone)]
struct CachedSoa {
    zone: String,
    primary_ns: String,
    expires: Instant,
}

/// Resolves names to their enclosing zone apex and caches the answers.
///
/// Both caches sit behind their own mutex and are never held across a
/// network call.
#[derive(Debug)]
pub struct ZoneResolver {
    wire: WireClient,
    recursive: Vec<String>,
    zones: Mutex<HashMap<String, String>>,
    soa: Mutex<HashMap<String, CachedSoa>>,
}

impl ZoneResolver {
    pub fn new(recursive_nameservers: Vec<String>) -> Self {
        Self::with_timeout(recursive_nameservers, DEFAULT_QUERY_TIMEOUT)
    }

    pub fn with_timeout(recursive_nameservers: Vec<String>, timeout: Duration) -> Self {
        Self {
            wire: WireClient::new(timeout),
            recursive: recursive_nameservers,
            zones: Mutex::new(HashMap::new()),
            soa: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn wire(&self) -> &WireClient {
        &self.wire
    }

    pub(crate) fn recursive_nameservers(&self) -> &[String] {
        &self.recursive
    }

    /// Returns the apex (with trailing dot) of the zone containing `fqdn`.
    pub fn find_zone_by_fqdn(&self, fqdn: &str) -> Result<String, DnsError> {
        let fqdn = to_fqdn(fqdn);
        if let Some(zone) = lock_recovering(&self.zones).get(&fqdn).cloned() {
            return Ok(zone);
        }
        let soa = self.lookup_soa(&fqdn)?;
        lock_recovering(&self.zones).insert(fqdn, soa.zone.clone());
        Ok(soa.zone)
    }

    /// The primary nameserver (SOA MNAME) of the zone containing `fqdn`.
    pub fn primary_nameserver(&self, fqdn: &str) -> Result<String, DnsError> {
        Ok(self.lookup_soa(&to_fqdn(fqdn))?.primary_ns)
    }

    pub fn clear_cache(&self) {
        lock_recovering(&self.zones).clear();
        lock_recovering(&self.soa).clear();
    }

    /// The label walk. Queries are iterative (recursion not desired) so a
    /// resolver cannot paper over delegation details; NXDOMAIN and a CNAME
    /// at the queried name both mean "not the apex, go up one label".
    fn lookup_soa(&self, fqdn: &str) -> Result<CachedSoa, DnsError> {
        let labels: Vec<&str> = fqdn.trim_end_matches('.').split('.').collect();
        for start in 0..labels.len() {
            let domain = format!("{}.", labels[start..].join("."));
            if let Some(cached) = self.cached_soa(&domain) {
                return Ok(cached);
            }

            let name = Name::from_ascii(&domain)?;
            let response = self.wire.query(&self.recursive, &name, RecordType::SOA, false)?;
            match response.response_code() {
                ResponseCode::NXDomain => continue,
                ResponseCode::NoError => {
                    if has_cname_at(&response, &name) {
                        debug!("[dns] {domain} is an alias, walking up");
                        continue;
                    }
                    let soa = response.answers().iter().find_map(|record| {
                        match record.data() {
                            RData::SOA(soa) => Some((record.name().clone(), soa.clone())),
                            _ => None,
                        }
                    });
                    if let Some((owner, soa)) = soa {
                        let zone = owner.to_ascii();
                        debug!("[dns] zone apex for {fqdn} is {zone}");
                        let cached = CachedSoa {
                            zone,
                            primary_ns: soa.mname().to_ascii().to_lowercase(),
                            expires: Instant::now()
                                + Duration::from_secs(soa.refresh().max(0) as u64),
                        };
                        lock_recovering(&self.soa).insert(domain, cached.clone());
                        return Ok(cached);
                    }
                }
                other => {
                    return Err(DnsError::UnexpectedRcode {
                        domain,
                        rcode: rcode_name(other),
                    });
                }
            }
        }
        Err(DnsError::NoSoaFound {
            fqdn: fqdn.to_string(),
        })
    }

    fn cached_soa(&self, domain: &str) -> Option<CachedSoa> {
        let mut cache = lock_recovering(&self.soa);
        match cache.get(domain) {
            Some(cached) if cached.expires > Instant::now() => Some(cached.clone()),
            Some(_) => {
                cache.remove(domain);
                None
            }
            None => None,
        }
    }
}

fn lock_recovering<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
