//! Order resource operations (RFC 8555 §7.1.3, §7.4).

use std::net::IpAddr;

use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use log::info;
use serde::{Deserialize, Serialize};

use super::account::require_url;
use super::client::AcmeClient;
use super::error::AcmeError;
use super::problem::Problem;
use crate::cancel::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Dns,
    Ip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: IdentifierKind,
    pub value: String,
}

impl Identifier {
    /// Derives the identifier type from the value: an IP literal becomes an
    /// `ip` identifier, anything else a `dns` name.
    pub fn from_value(value: &str) -> Self {
        let kind = if value.parse::<IpAddr>().is_ok() {
            IdentifierKind::Ip
        } else {
            IdentifierKind::Dns
        };
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Valid | OrderStatus::Invalid)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub status: OrderStatus,
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub authorizations: Vec<String>,
    pub finalize: String,
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub not_before: Option<String>,
    #[serde(default)]
    pub not_after: Option<String>,
    #[serde(default)]
    pub error: Option<Problem>,
}

/// Parameters for a new order. `replaces` carries the ARI identifier of the
/// certificate this order renews, when known.
#[derive(Debug, Clone, Default)]
pub struct NewOrder {
    pub identifiers: Vec<Identifier>,
    pub not_before: Option<String>,
    pub not_after: Option<String>,
    pub replaces: Option<String>,
}

impl NewOrder {
    pub fn for_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            identifiers: values
                .into_iter()
                .map(|value| Identifier::from_value(value.as_ref()))
                .collect(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order: Order,
    pub location: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewOrderRequest<'a> {
    identifiers: &'a [Identifier],
    #[serde(skip_serializing_if = "Option::is_none")]
    not_before: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    not_after: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    replaces: Option<&'a str>,
}

#[derive(Serialize)]
struct FinalizeRequest {
    csr: String,
}

impl AcmeClient {
    pub fn new_order(
        &self,
        new_order: &NewOrder,
        cancel: &CancelToken,
    ) -> Result<CreatedOrder, AcmeError> {
        let request = NewOrderRequest {
            identifiers: &new_order.identifiers,
            not_before: new_order.not_before.as_deref(),
            not_after: new_order.not_after.as_deref(),
            replaces: new_order.replaces.as_deref(),
        };
        let url = self.directory().new_order.clone();
        let response = self.post(&url, &request, cancel)?;
        let location = response
            .location
            .clone()
            .ok_or(AcmeError::MissingHeader("Location"))?;
        info!("[acme] order created at {location}");
        Ok(CreatedOrder {
            order: response.json()?,
            location,
        })
    }

    pub fn fetch_order(&self, order_url: &str, cancel: &CancelToken) -> Result<Order, AcmeError> {
        require_url(order_url, "order")?;
        self.post_as_get(order_url, cancel)?.json()
    }

    /// Submits a caller-built CSR (DER bytes) to the order's finalize URL.
    pub fn finalize_order(
        &self,
        finalize_url: &str,
        csr_der: &[u8],
        cancel: &CancelToken,
    ) -> Result<Order, AcmeError> {
        require_url(finalize_url, "finalize")?;
        let request = FinalizeRequest {
            csr: BASE64_URL_SAFE_NO_PAD.encode(csr_der),
        };
        self.post(finalize_url, &request, cancel)?.json()
    }
}
