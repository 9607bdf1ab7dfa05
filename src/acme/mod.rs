//! The signed-request pipeline: directory, nonces, JWS envelopes, the
//! request executor, and the typed resource operations built on top of it.

pub mod account;
pub mod authorization;
pub mod cert;
pub mod client;
pub mod directory;
pub mod error;
pub mod jws;
pub mod nonce;
pub mod order;
pub mod problem;

pub use account::{Account, AccountStatus, CreatedAccount, EabCredentials, RegisterOptions};
pub use authorization::{Authorization, AuthorizationStatus, Challenge, ChallengeStatus};
pub use cert::{RawCertificate, RenewalInfo, ari_cert_id};
pub use client::{AcmeClient, RetryPolicy};
pub use directory::Directory;
pub use error::AcmeError;
pub use jws::{JoseJson, JwsSigner};
pub use nonce::NoncePool;
pub use order::{CreatedOrder, Identifier, IdentifierKind, NewOrder, Order, OrderStatus};
pub use problem::Problem;
