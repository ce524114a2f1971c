//! Service-account OAuth for the quota store
//!
//! Mints a fresh bearer token for every gated request:
//! - import the PKCS#8 RSA key from the service-account JSON
//! - sign an RS256 JWT assertion (RFC 7523)
//! - exchange it at the OAuth2 token endpoint

mod assertion;
mod client;
mod key;
mod service_account;

pub use assertion::{ASSERTION_LIFETIME_SECS, AssertionClaims, AssertionSigner, DATASTORE_SCOPE};
pub use client::{AccessToken, DEFAULT_TOKEN_URL, JWT_BEARER_GRANT_TYPE, TokenExchanger};
pub use key::SigningKey;
pub use service_account::ServiceAccountCredential;
