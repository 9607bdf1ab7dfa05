//! Directory bootstrap (RFC 8555 §7.1.1).

use serde::Deserialize;

use super::error::AcmeError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDirectory {
    new_nonce: Option<String>,
    new_account: Option<String>,
    new_order: Option<String>,
    revoke_cert: Option<String>,
    key_change: Option<String>,
    renewal_info: Option<String>,
    #[serde(default)]
    meta: DirectoryMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
    #[serde(default)]
    pub terms_of_service: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub external_account_required: bool,
}

/// The CA-advertised operation map. Fetched once at client construction and
/// immutable thereafter.
#[derive(Debug, Clone)]
pub struct Directory {
    pub new_nonce: String,
    pub new_account: String,
    pub new_order: String,
    pub revoke_cert: Option<String>,
    pub key_change: Option<String>,
    pub renewal_info: Option<String>,
    pub meta: DirectoryMeta,
}

impl Directory {
    /// Fetches and validates the directory. Missing `newAccount`, `newOrder`
    /// or `newNonce` entries are a hard startup failure.
    pub fn fetch(agent: &ureq::Agent, url: &str) -> Result<Self, AcmeError> {
        let body = agent.get(url).call()?.into_string()?;
        let raw: RawDirectory = serde_json::from_str(&body)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawDirectory) -> Result<Self, AcmeError> {
        Ok(Self {
            new_nonce: raw.new_nonce.ok_or(AcmeError::MissingEndpoint("newNonce"))?,
            new_account: raw
                .new_account
                .ok_or(AcmeError::MissingEndpoint("newAccount"))?,
            new_order: raw.new_order.ok_or(AcmeError::MissingEndpoint("newOrder"))?,
            revoke_cert: raw.revoke_cert,
            key_change: raw.key_change,
            renewal_info: raw.renewal_info,
            meta: raw.meta,
        })
    }
}
