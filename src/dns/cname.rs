//! CNAME chain following for challenge record names. Operators commonly
//! alias `_acme-challenge` labels into a zone a provider can write to, so
//! the record must be placed at the end of the chain.

use hickory_proto::rr::{Name, RData, RecordType};
use log::debug;

use super::error::DnsError;
use super::zone::ZoneResolver;
use crate::fqdn::to_fqdn;

/// Chains longer than this are abandoned; the last name reached is used.
pub const MAX_CNAME_DEPTH: usize = 50;

/// Follows CNAMEs starting at `fqdn`, asking `lookup` for the alias target
/// of each name. `lookup` returns `None` when the name is not an alias.
/// Self-referential records terminate the walk instead of looping.
pub fn follow_cnames_with<F>(fqdn: &str, mut lookup: F) -> Result<String, DnsError>
where
    F: FnMut(&str) -> Result<Option<String>, DnsError>,
{
    let mut current = to_fqdn(fqdn);
    for _ in 0..MAX_CNAME_DEPTH {
        match lookup(&current)? {
            Some(target) => {
                let target = to_fqdn(&target);
                if target.eq_ignore_ascii_case(&current) {
                    return Ok(current);
                }
                debug!("[dns] {current} is an alias for {target}");
                current = target;
            }
            None => return Ok(current),
        }
    }
    Ok(current)
}

impl ZoneResolver {
    /// Resolves `fqdn` through any CNAME chain using the recursive
    /// resolvers, returning the name the challenge record must live at.
    pub fn follow_cnames(&self, fqdn: &str) -> Result<String, DnsError> {
        follow_cnames_with(fqdn, |name| {
            let owner = Name::from_ascii(name)?;
            let response =
                self.wire()
                    .query(self.recursive_nameservers(), &owner, RecordType::CNAME, true)?;
            // Owner comparison through Name is case-insensitive.
            Ok(response.answers().iter().find_map(|record| match record.data() {
                RData::CNAME(target) if *record.name() == owner => Some(target.0.to_ascii()),
                _ => None,
            }))
        })
    }
}
