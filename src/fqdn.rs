//! Domain-name normalization helpers shared by the ACME and DNS subsystems.

use anyhow::{Result, anyhow};

/// Normalizes a user-supplied domain to lowercase ASCII (IDNA) without a
/// trailing dot.
pub fn normalize_domain(input: &str) -> Result<String> {
    let trimmed = input.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(anyhow!("domain name is required"));
    }
    let ascii = idna::domain_to_ascii(trimmed)
        .map_err(|err| anyhow!("invalid domain name {trimmed:?}: {err}"))?;
    Ok(ascii.to_lowercase())
}

/// Appends the trailing dot that makes a name fully qualified.
pub fn to_fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

/// Strips a trailing dot, if any.
pub fn unfqdn(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}

/// The fully-qualified owner name of the DNS-01 challenge record for a
/// domain: `_acme-challenge.<domain>.`
pub fn challenge_record_name(domain: &str) -> String {
    let trimmed = domain.trim_end_matches('.');
    if let Some(rest) = trimmed.strip_prefix("*.") {
        return format!("_acme-challenge.{rest}.");
    }
    if trimmed.starts_with("_acme-challenge.") {
        format!("{trimmed}.")
    } else {
        format!("_acme-challenge.{trimmed}.")
    }
}
