//! JWS envelope construction (RFC 7515, profiled by RFC 8555 §6.2).
//!
//! Every ACME request body is wrapped in a flattened JSON JWS signed with the
//! account's P-256 key. The protected header carries the anti-replay nonce
//! and the target URL, so a captured envelope cannot be replayed against a
//! different endpoint.

use std::sync::RwLock;

use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey};
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::error::AcmeError;

/// A flattened JSON JWS, ready to POST as `application/jose+json`.
#[derive(Debug, Clone, Serialize)]
pub struct JoseJson {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

/// Public account key in JWK form. Field order is the RFC 7638 lexicographic
/// order, which makes the plain serde serialization the canonical thumbprint
/// input.
#[derive(Debug, Clone, Serialize)]
pub struct Jwk {
    crv: &'static str,
    kty: &'static str,
    x: String,
    y: String,
}

#[derive(Serialize)]
struct Protected<'a> {
    alg: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<&'a Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<&'a str>,
    url: &'a str,
}

/// Signs ACME request payloads with an ES256 account key.
///
/// The key identifier starts out unset; the very first account-creation call
/// signs with the embedded JWK instead, and the CA-assigned account URL is
/// installed via [`JwsSigner::set_key_id`] for every request after that.
pub struct JwsSigner {
    key: EcKey<Private>,
    kid: RwLock<Option<String>>,
    jwk: Jwk,
    thumbprint: String,
}

impl JwsSigner {
    /// Generates a fresh P-256 account key.
    pub fn generate() -> Result<Self, AcmeError> {
        let group = p256()?;
        let key = EcKey::generate(&group)?;
        Self::from_key(key)
    }

    /// Loads an account key from PEM (PKCS#8 or SEC1).
    pub fn from_pem(pem: &[u8]) -> Result<Self, AcmeError> {
        let pkey = PKey::private_key_from_pem(pem)?;
        Self::from_key(pkey.ec_key()?)
    }

    /// Serializes the account key as PKCS#8 PEM for persistence by the
    /// caller.
    pub fn to_pem(&self) -> Result<Vec<u8>, AcmeError> {
        let pkey = PKey::from_ec_key(self.key.clone())?;
        Ok(pkey.private_key_to_pem_pkcs8()?)
    }

    fn from_key(key: EcKey<Private>) -> Result<Self, AcmeError> {
        let group = p256()?;
        let mut ctx = BigNumContext::new()?;
        let mut x = BigNum::new()?;
        let mut y = BigNum::new()?;
        key.public_key().affine_coordinates(&group, &mut x, &mut y, &mut ctx)?;
        let jwk = Jwk {
            crv: "P-256",
            kty: "EC",
            x: BASE64_URL_SAFE_NO_PAD.encode(x.to_vec_padded(32)?),
            y: BASE64_URL_SAFE_NO_PAD.encode(y.to_vec_padded(32)?),
        };
        let canonical = serde_json::to_vec(&jwk)?;
        let thumbprint = BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(&canonical));
        Ok(Self {
            key,
            kid: RwLock::new(None),
            jwk,
            thumbprint,
        })
    }

    /// RFC 7638 SHA-256 thumbprint of the account key, base64url-encoded.
    /// Used to compute challenge key authorizations.
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    /// The account URL assigned by the CA, once known.
    pub fn key_id(&self) -> Option<String> {
        self.read_kid().clone()
    }

    /// Installs the account URL as the key identifier for all subsequent
    /// requests. Safe to call from concurrent requests; last writer wins.
    pub fn set_key_id(&self, kid: String) {
        *self.kid.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(kid);
    }

    fn read_kid(&self) -> std::sync::RwLockReadGuard<'_, Option<String>> {
        self.kid.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Signs `payload` for `url`, embedding `nonce`. `None` yields the empty
    /// payload of a POST-as-GET.
    pub fn sign<T: Serialize + ?Sized>(
        &self,
        url: &str,
        nonce: &str,
        payload: Option<&T>,
    ) -> Result<JoseJson, AcmeError> {
        let kid = self.read_kid();
        let protected = Protected {
            alg: "ES256",
            jwk: if kid.is_none() { Some(&self.jwk) } else { None },
            kid: kid.as_deref(),
            nonce: Some(nonce),
            url,
        };
        let protected = base64_json(&protected)?;
        let payload = match payload {
            Some(data) => base64_json(data)?,
            None => String::new(),
        };
        let signature = self.sign_raw(format!("{protected}.{payload}").as_bytes())?;
        Ok(JoseJson {
            protected,
            payload,
            signature: BASE64_URL_SAFE_NO_PAD.encode(signature),
        })
    }

    /// Signs the External-Account-Binding payload (RFC 8555 §7.3.4): an
    /// HS256 JWS over this account's JWK, keyed with the HMAC secret the CA
    /// operator supplied out-of-band.
    pub fn sign_eab(
        &self,
        new_account_url: &str,
        eab_kid: &str,
        hmac_b64: &str,
    ) -> Result<JoseJson, AcmeError> {
        let protected = Protected {
            alg: "HS256",
            jwk: None,
            kid: Some(eab_kid),
            nonce: None,
            url: new_account_url,
        };
        let protected = base64_json(&protected)?;
        let payload = base64_json(&self.jwk)?;
        let hmac_key = BASE64_URL_SAFE_NO_PAD
            .decode(hmac_b64.trim_end_matches('='))
            .map_err(|err| AcmeError::CertParse(format!("invalid EAB HMAC key: {err}")))?;
        let pkey = PKey::hmac(&hmac_key)?;
        let mut signer = openssl::sign::Signer::new(MessageDigest::sha256(), &pkey)?;
        signer.update(format!("{protected}.{payload}").as_bytes())?;
        let signature = signer.sign_to_vec()?;
        Ok(JoseJson {
            protected,
            payload,
            signature: BASE64_URL_SAFE_NO_PAD.encode(signature),
        })
    }

    /// Raw ECDSA signature in the fixed-width r || s form JWS requires.
    fn sign_raw(&self, input: &[u8]) -> Result<Vec<u8>, AcmeError> {
        let digest = openssl::hash::hash(MessageDigest::sha256(), input)?;
        let sig = EcdsaSig::sign(&digest, &self.key)?;
        let mut out = sig.r().to_vec_padded(32)?;
        out.extend(sig.s().to_vec_padded(32)?);
        Ok(out)
    }
}

impl std::fmt::Debug for JwsSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwsSigner")
            .field("kid", &self.key_id())
            .field("thumbprint", &self.thumbprint)
            .finish()
    }
}

fn p256() -> Result<EcGroup, openssl::error::ErrorStack> {
    EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)
}

fn base64_json<T: Serialize + ?Sized>(data: &T) -> Result<String, AcmeError> {
    Ok(BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(data)?))
}
