//! Authoritative nameserver discovery for a zone.

use hickory_proto::rr::{Name, RData, RecordType};
use log::debug;

use super::error::DnsError;
use super::zone::ZoneResolver;

impl ZoneResolver {
    /// Looks up the NS set for `zone` through the recursive resolvers.
    /// Hostnames come back lowercased and deduplicated, without ports.
    pub fn authoritative_nameservers(&self, zone: &str) -> Result<Vec<String>, DnsError> {
        let name = Name::from_ascii(zone)?;
        let response =
            self.wire()
                .query(self.recursive_nameservers(), &name, RecordType::NS, true)?;

        let mut hosts: Vec<String> = response
            .answers()
            .iter()
            .filter_map(|record| match record.data() {
                RData::NS(ns) => Some(ns.0.to_ascii().to_lowercase()),
                _ => None,
            })
            .collect();
        hosts.sort();
        hosts.dedup();

        if hosts.is_empty() {
            return Err(DnsError::NoNameservers {
                zone: zone.to_string(),
            });
        }
        debug!("[dns] zone {zone} is served by {hosts:?}");
        Ok(hosts)
    }
}
