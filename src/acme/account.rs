//! Account resource operations (RFC 8555 §7.3).

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::client::AcmeClient;
use super::error::AcmeError;
use super::jws::JoseJson;
use crate::cancel::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Valid,
    Deactivated,
    Revoked,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub status: AccountStatus,
    #[serde(default)]
    pub contact: Vec<String>,
    #[serde(default)]
    pub orders: Option<String>,
}

/// External-Account-Binding credentials supplied out-of-band by the CA
/// operator.
#[derive(Debug, Clone)]
pub struct EabCredentials {
    pub kid: String,
    pub hmac_b64: String,
}

#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    pub contacts: Vec<String>,
    pub terms_of_service_agreed: bool,
    pub only_return_existing: bool,
    pub eab: Option<EabCredentials>,
}

/// A registered account together with its CA-assigned location URL, which
/// from then on serves as the signer's key identifier.
#[derive(Debug, Clone)]
pub struct CreatedAccount {
    pub account: Account,
    pub location: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewAccountRequest<'a> {
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    contact: &'a [String],
    terms_of_service_agreed: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    only_return_existing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_account_binding: Option<JoseJson>,
}

#[derive(Serialize)]
struct UpdateAccountRequest<'a> {
    contact: &'a [String],
}

#[derive(Serialize)]
struct DeactivateRequest {
    status: &'static str,
}

impl AcmeClient {
    /// Registers (or, with `only_return_existing`, looks up) the account for
    /// the signer's key. On success the `Location` header becomes the
    /// signer's key identifier for every subsequent request.
    pub fn register_account(
        &self,
        options: &RegisterOptions,
        cancel: &CancelToken,
    ) -> Result<CreatedAccount, AcmeError> {
        let new_account_url = self.directory().new_account.clone();
        let external_account_binding = match &options.eab {
            Some(eab) => Some(self.signer().sign_eab(&new_account_url, &eab.kid, &eab.hmac_b64)?),
            None => None,
        };
        let request = NewAccountRequest {
            contact: &options.contacts,
            terms_of_service_agreed: options.terms_of_service_agreed,
            only_return_existing: options.only_return_existing,
            external_account_binding,
        };

        let response = self.post(&new_account_url, &request, cancel)?;
        let location = response
            .location
            .clone()
            .ok_or(AcmeError::MissingHeader("Location"))?;
        self.signer().set_key_id(location.clone());
        info!("[acme] account registered at {location}");
        Ok(CreatedAccount {
            account: response.json()?,
            location,
        })
    }

    pub fn fetch_account(
        &self,
        account_url: &str,
        cancel: &CancelToken,
    ) -> Result<Account, AcmeError> {
        require_url(account_url, "account")?;
        self.post_as_get(account_url, cancel)?.json()
    }

    pub fn update_account_contacts(
        &self,
        account_url: &str,
        contacts: &[String],
        cancel: &CancelToken,
    ) -> Result<Account, AcmeError> {
        require_url(account_url, "account")?;
        let request = UpdateAccountRequest { contact: contacts };
        self.post(account_url, &request, cancel)?.json()
    }

    /// Deactivation is terminal and irreversible.
    pub fn deactivate_account(
        &self,
        account_url: &str,
        cancel: &CancelToken,
    ) -> Result<Account, AcmeError> {
        require_url(account_url, "account")?;
        debug!("[acme] deactivating account {account_url}");
        let request = DeactivateRequest {
            status: "deactivated",
        };
        self.post(account_url, &request, cancel)?.json()
    }
}

pub(crate) fn require_url(url: &str, what: &'static str) -> Result<(), AcmeError> {
    if url.is_empty() {
        Err(AcmeError::EmptyUrl(what))
    } else {
        Ok(())
    }
}
