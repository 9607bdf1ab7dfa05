//! Authorization and challenge resources (RFC 8555 §7.1.4, §7.5).

use log::debug;
use serde::{Deserialize, Serialize};

use super::account::require_url;
use super::client::AcmeClient;
use super::error::AcmeError;
use super::order::Identifier;
use super::problem::Problem;
use crate::cancel::CancelToken;

pub const DNS01: &str = "dns-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub status: ChallengeStatus,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub validated: Option<String>,
    #[serde(default)]
    pub error: Option<Problem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub wildcard: bool,
}

impl Authorization {
    pub fn find_challenge(&self, kind: &str) -> Option<&Challenge> {
        self.challenges.iter().find(|challenge| challenge.kind == kind)
    }
}

#[derive(Serialize)]
struct DeactivateRequest {
    status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChallengeReadyRequest<'a> {
    key_authorization: &'a str,
}

impl AcmeClient {
    pub fn fetch_authorization(
        &self,
        authz_url: &str,
        cancel: &CancelToken,
    ) -> Result<Authorization, AcmeError> {
        require_url(authz_url, "authorization")?;
        self.post_as_get(authz_url, cancel)?.json()
    }

    /// Deactivating an authorization is terminal and irreversible.
    pub fn deactivate_authorization(
        &self,
        authz_url: &str,
        cancel: &CancelToken,
    ) -> Result<Authorization, AcmeError> {
        require_url(authz_url, "authorization")?;
        debug!("[acme] deactivating authorization {authz_url}");
        let request = DeactivateRequest {
            status: "deactivated",
        };
        self.post(authz_url, &request, cancel)?.json()
    }

    pub fn fetch_challenge(
        &self,
        challenge_url: &str,
        cancel: &CancelToken,
    ) -> Result<Challenge, AcmeError> {
        require_url(challenge_url, "challenge")?;
        self.post_as_get(challenge_url, cancel)?.json()
    }

    /// Tells the CA the challenge response is in place and ready for
    /// validation.
    pub fn accept_challenge(
        &self,
        challenge_url: &str,
        key_authorization: &str,
        cancel: &CancelToken,
    ) -> Result<Challenge, AcmeError> {
        require_url(challenge_url, "challenge")?;
        let request = ChallengeReadyRequest {
            key_authorization,
        };
        self.post(challenge_url, &request, cancel)?.json()
    }
}
