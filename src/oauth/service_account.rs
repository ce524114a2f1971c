//! Service-account credential loaded from the JSON key file contents.

use std::fmt;

use serde::Deserialize;

use crate::{Error, Result};

/// The fields of a service-account key file this gateway uses.
///
/// Loaded once at startup and never mutated.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountCredential {
    /// Service-account email, used as assertion issuer and subject
    pub client_email: String,
    /// PKCS#8 PEM private key
    pub private_key: String,
    /// Project that owns the document store
    pub project_id: String,
}

impl fmt::Debug for ServiceAccountCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountCredential")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("project_id", &self.project_id)
            .finish()
    }
}

impl ServiceAccountCredential {
    /// Parse the service-account JSON document.
    ///
    /// Every field must be present and non-blank; a credential without a
    /// project id cannot address the quota store.
    pub fn from_json(json: &str) -> Result<Self> {
        let credential: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid service account JSON: {e}")))?;

        for (name, value) in [
            ("client_email", &credential.client_email),
            ("private_key", &credential.private_key),
            ("project_id", &credential.project_id),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("service account {name} is empty")));
            }
        }

        Ok(credential)
    }
}
