//! Certificate download, revocation, and ACME Renewal Information
//! (RFC 8555 §7.4.2, §7.6; RFC 9773).

use std::time::Duration;

use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use x509_parser::prelude::*;

use super::account::require_url;
use super::client::AcmeClient;
use super::error::AcmeError;
use super::problem::Problem;
use crate::cancel::CancelToken;

const PEM_CERT_BEGIN: &str = "-----BEGIN CERTIFICATE-----";

/// A downloaded certificate: leaf PEM plus issuer-chain PEM.
#[derive(Debug, Clone)]
pub struct RawCertificate {
    pub leaf: String,
    pub issuer: String,
}

#[derive(Debug, Clone)]
pub struct RenewalInfo {
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub explanation_url: Option<String>,
    /// Parsed from the `Retry-After` header when present.
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenewalInfoResponse {
    #[serde(default)]
    suggested_window: Option<SuggestedWindow>,
    #[serde(rename = "explanationURL", default)]
    explanation_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SuggestedWindow {
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
}

#[derive(Serialize)]
struct RevokeRequest {
    certificate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<u8>,
}

impl AcmeClient {
    /// Downloads the certificate at `cert_url`. With `bundle` the leaf keeps
    /// the full chain; otherwise trailing PEM blocks are split off as the
    /// issuer chain (or fetched from the `rel="up"` link when the body holds
    /// only the leaf).
    pub fn download_certificate(
        &self,
        cert_url: &str,
        bundle: bool,
        cancel: &CancelToken,
    ) -> Result<RawCertificate, AcmeError> {
        Ok(self.fetch_certificate(cert_url, bundle, cancel)?.0)
    }

    /// Downloads the primary chain plus every `rel="alternate"` chain the CA
    /// advertises.
    pub fn download_all_chains(
        &self,
        cert_url: &str,
        bundle: bool,
        cancel: &CancelToken,
    ) -> Result<Vec<RawCertificate>, AcmeError> {
        let (primary, alternates) = self.fetch_certificate(cert_url, bundle, cancel)?;
        let mut chains = vec![primary];
        for alternate in alternates {
            debug!("[acme] fetching alternate chain {alternate}");
            chains.push(self.fetch_certificate(&alternate, bundle, cancel)?.0);
        }
        Ok(chains)
    }

    fn fetch_certificate(
        &self,
        cert_url: &str,
        bundle: bool,
        cancel: &CancelToken,
    ) -> Result<(RawCertificate, Vec<String>), AcmeError> {
        require_url(cert_url, "certificate")?;
        let response = self.post_as_get(cert_url, cancel)?;
        let alternates = links_with_rel(&response.links, "alternate");
        let up = links_with_rel(&response.links, "up");

        let certificate = if pem_block_count(&response.body) <= 1 {
            let issuer = match up.first() {
                Some(up_url) => self.post_as_get(up_url, cancel)?.body,
                None => String::new(),
            };
            join_up_chain(response.body, issuer, bundle)
        } else {
            split_pem_bundle(&response.body, bundle)
        };
        Ok((certificate, alternates))
    }

    /// Revokes a certificate (DER bytes) with an optional RFC 5280 reason
    /// code.
    pub fn revoke_certificate(
        &self,
        cert_der: &[u8],
        reason: Option<u8>,
        cancel: &CancelToken,
    ) -> Result<(), AcmeError> {
        let url = self
            .directory()
            .revoke_cert
            .clone()
            .ok_or(AcmeError::MissingEndpoint("revokeCert"))?;
        let request = RevokeRequest {
            certificate: BASE64_URL_SAFE_NO_PAD.encode(cert_der),
            reason,
        };
        self.post(&url, &request, cancel)?;
        Ok(())
    }

    /// Looks up the suggested renewal window for `cert_id` (an ARI
    /// certificate identifier, see [`ari_cert_id`]). Fails fast with
    /// [`AcmeError::RenewalInfoNotSupported`] when the directory does not
    /// advertise the endpoint.
    pub fn renewal_info(
        &self,
        cert_id: &str,
        cancel: &CancelToken,
    ) -> Result<RenewalInfo, AcmeError> {
        let base = self
            .directory()
            .renewal_info
            .clone()
            .ok_or(AcmeError::RenewalInfoNotSupported)?;
        require_url(cert_id, "certificate identifier")?;
        cancel.check()?;

        // Renewal-info lookups are plain unauthenticated GETs (RFC 9773).
        let url = format!("{}/{}", base.trim_end_matches('/'), cert_id);
        let response = match self.agent().get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let text = response.into_string().unwrap_or_default();
                return Err(AcmeError::Problem(Problem::from_response(status, &text)));
            }
            Err(err) => return Err(err.into()),
        };

        let retry_after = response
            .header("Retry-After")
            .and_then(|value| parse_retry_after(value, Utc::now()));
        let body: RenewalInfoResponse = serde_json::from_str(&response.into_string()?)?;
        let window = body.suggested_window.unwrap_or(SuggestedWindow {
            start: None,
            end: None,
        });
        Ok(RenewalInfo {
            window_start: window.start.as_deref().and_then(parse_rfc3339),
            window_end: window.end.as_deref().and_then(parse_rfc3339),
            explanation_url: body.explanation_url,
            retry_after,
        })
    }
}

/// Builds the ARI certificate identifier for a leaf certificate (DER bytes):
/// `base64url(authority key identifier) "." base64url(serial)`, where the
/// serial is its DER encoding with the two-byte tag+length prefix stripped.
pub fn ari_cert_id(leaf_der: &[u8]) -> Result<String, AcmeError> {
    let (_, cert) = X509Certificate::from_der(leaf_der)
        .map_err(|err| AcmeError::CertParse(format!("invalid certificate DER: {err}")))?;
    let aki = cert
        .iter_extensions()
        .find_map(|ext| match ext.parsed_extension() {
            ParsedExtension::AuthorityKeyIdentifier(aki) => {
                aki.key_identifier.as_ref().map(|key_id| key_id.0.to_vec())
            }
            _ => None,
        })
        .ok_or_else(|| {
            AcmeError::CertParse("certificate has no Authority Key Identifier".into())
        })?;
    Ok(ari_cert_id_from_parts(&aki, cert.raw_serial()))
}

/// Same as [`ari_cert_id`], for a PEM-encoded leaf.
pub fn ari_cert_id_from_pem(leaf_pem: &[u8]) -> Result<String, AcmeError> {
    let (_, parsed) = x509_parser::pem::parse_x509_pem(leaf_pem)
        .map_err(|err| AcmeError::CertParse(format!("invalid certificate PEM: {err}")))?;
    ari_cert_id(&parsed.contents)
}

fn ari_cert_id_from_parts(aki: &[u8], raw_serial: &[u8]) -> String {
    // DER-encode the serial INTEGER, then strip the 2-byte tag+length
    // prefix. Serials are at most 20 octets, so the short length form holds.
    let mut der = Vec::with_capacity(raw_serial.len() + 2);
    der.push(0x02);
    der.push(raw_serial.len() as u8);
    der.extend_from_slice(raw_serial);
    format!(
        "{}.{}",
        BASE64_URL_SAFE_NO_PAD.encode(aki),
        BASE64_URL_SAFE_NO_PAD.encode(&der[2..])
    )
}

/// Extracts the URLs carrying the wanted `rel` from `Link` header values.
fn links_with_rel(links: &[String], wanted: &str) -> Vec<String> {
    let mut out = Vec::new();
    for header in links {
        for part in header.split(',') {
            let part = part.trim();
            let Some(rest) = part.strip_prefix('<') else {
                continue;
            };
            let Some((url, attrs)) = rest.split_once('>') else {
                continue;
            };
            let matched = attrs.split(';').any(|attr| {
                attr.trim()
                    .strip_prefix("rel=")
                    .map(|value| {
                        value
                            .trim_matches('"')
                            .split_whitespace()
                            .any(|rel| rel == wanted)
                    })
                    .unwrap_or(false)
            });
            if matched {
                out.push(url.to_string());
            }
        }
    }
    out
}

/// Shapes the up-link case, where the body held only the leaf and the issuer
/// came from the `rel="up"` resource. With `bundle` the leaf keeps the whole
/// chain, matching [`split_pem_bundle`].
fn join_up_chain(mut leaf: String, issuer: String, bundle: bool) -> RawCertificate {
    if bundle && !issuer.is_empty() {
        if !leaf.ends_with('\n') {
            leaf.push('\n');
        }
        leaf.push_str(&issuer);
    }
    RawCertificate { leaf, issuer }
}

fn pem_block_count(body: &str) -> usize {
    body.matches(PEM_CERT_BEGIN).count()
}

/// Splits a PEM bundle: the first block is the leaf, everything after it the
/// issuer chain. With `bundle` the leaf keeps the whole body.
fn split_pem_bundle(body: &str, bundle: bool) -> RawCertificate {
    match body.match_indices(PEM_CERT_BEGIN).nth(1) {
        Some((index, _)) => RawCertificate {
            leaf: if bundle {
                body.to_string()
            } else {
                body[..index].trim_end().to_string() + "\n"
            },
            issuer: body[index..].to_string(),
        },
        None => RawCertificate {
            leaf: body.to_string(),
            issuer: String::new(),
        },
    }
}

/// Parses a `Retry-After` value: either delay seconds or an HTTP-date.
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    (date.with_timezone(&Utc) - now).to_std().ok()
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF: &str = "-----BEGIN CERTIFICATE-----\nbGVhZg==\n-----END CERTIFICATE-----\n";
    const ISSUER: &str = "-----BEGIN CERTIFICATE-----\naXNzdWVy\n-----END CERTIFICATE-----\n";

    #[test]
    fn link_header_parsing_picks_the_right_rel() {
        let links = vec![
            r#"<https://ca.test/issuer>;rel="up""#.to_string(),
            r#"<https://ca.test/alt/1>;rel="alternate", <https://ca.test/alt/2>;rel="alternate""#
                .to_string(),
            r#"<https://ca.test/tos>;rel="terms-of-service""#.to_string(),
        ];
        assert_eq!(links_with_rel(&links, "up"), vec!["https://ca.test/issuer"]);
        assert_eq!(
            links_with_rel(&links, "alternate"),
            vec!["https://ca.test/alt/1", "https://ca.test/alt/2"]
        );
        assert!(links_with_rel(&links, "index").is_empty());
    }

    #[test]
    fn bundle_split_separates_leaf_and_issuer() {
        let body = format!("{LEAF}{ISSUER}");
        let split = split_pem_bundle(&body, false);
        assert_eq!(split.leaf.matches(PEM_CERT_BEGIN).count(), 1);
        assert!(split.leaf.contains("bGVhZg=="));
        assert_eq!(split.issuer, ISSUER);
    }

    #[test]
    fn bundle_split_keeps_chain_when_bundled() {
        let body = format!("{LEAF}{ISSUER}");
        let split = split_pem_bundle(&body, true);
        assert_eq!(split.leaf, body);
        assert_eq!(split.issuer, ISSUER);
    }

    #[test]
    fn up_link_issuer_joins_the_leaf_when_bundled() {
        let joined = join_up_chain(LEAF.to_string(), ISSUER.to_string(), true);
        assert_eq!(joined.leaf, format!("{LEAF}{ISSUER}"));
        assert_eq!(joined.issuer, ISSUER);

        // A body without a trailing newline still yields well-formed PEM.
        let trimmed = LEAF.trim_end().to_string();
        let joined = join_up_chain(trimmed, ISSUER.to_string(), true);
        assert_eq!(joined.leaf, format!("{LEAF}{ISSUER}"));
    }

    #[test]
    fn up_link_issuer_stays_separate_when_not_bundled() {
        let split = join_up_chain(LEAF.to_string(), ISSUER.to_string(), false);
        assert_eq!(split.leaf, LEAF);
        assert_eq!(split.issuer, ISSUER);

        // No up link at all leaves the leaf untouched either way.
        let alone = join_up_chain(LEAF.to_string(), String::new(), true);
        assert_eq!(alone.leaf, LEAF);
        assert!(alone.issuer.is_empty());
    }

    #[test]
    fn single_block_has_no_issuer() {
        let split = split_pem_bundle(LEAF, false);
        assert_eq!(split.leaf, LEAF);
        assert!(split.issuer.is_empty());
    }

    #[test]
    fn ari_id_strips_the_der_prefix() {
        // AKI bytes X and serial content Y: the identifier must be
        // base64url(X) "." base64url(der(Y)[2..]).
        let aki = [0x69u8, 0x88, 0x5b, 0x6b];
        let serial = [0x00u8, 0x87, 0x65, 0x43, 0x21];
        let id = ari_cert_id_from_parts(&aki, &serial);
        let (aki_part, serial_part) = id.split_once('.').unwrap();
        assert_eq!(aki_part, BASE64_URL_SAFE_NO_PAD.encode(aki));
        assert_eq!(serial_part, BASE64_URL_SAFE_NO_PAD.encode(serial));

        let der = [0x02u8, 0x05, 0x00, 0x87, 0x65, 0x43, 0x21];
        assert_eq!(serial_part, BASE64_URL_SAFE_NO_PAD.encode(&der[2..]));
    }

    #[test]
    fn retry_after_parses_seconds_and_http_dates() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            parse_retry_after("120", now),
            Some(Duration::from_secs(120))
        );
        assert_eq!(
            parse_retry_after("Wed, 01 May 2024 12:01:00 GMT", now),
            Some(Duration::from_secs(60))
        );
        // A date in the past yields no delay rather than an error.
        assert_eq!(parse_retry_after("Wed, 01 May 2024 11:00:00 GMT", now), None);
        assert_eq!(parse_retry_after("not-a-date", now), None);
    }
}
