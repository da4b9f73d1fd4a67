//! Secret references for ClusterMonitor CRDs
//!
//! References a Kubernetes Secret by name plus the key names to read from it.
//! Key names default to the conventional AWS-style credential keys so most
//! specs only need to set `name`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a Secret holding a credential pair.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    /// Secret name (same namespace as the referencing ClusterMonitor)
    pub name: String,

    /// Key holding the access key ID
    #[serde(default = "default_access_key_id_key", rename = "accessKeyIDKey")]
    pub access_key_id_key: String,

    /// Key holding the secret access key
    #[serde(default = "default_secret_access_key_key")]
    pub secret_access_key_key: String,
}

fn default_access_key_id_key() -> String {
    "access-key-id".to_string()
}

fn default_secret_access_key_key() -> String {
    "secret-access-key".to_string()
}

impl SecretRef {
    /// Create a reference with the default key names.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            access_key_id_key: default_access_key_id_key(),
            secret_access_key_key: default_secret_access_key_key(),
        }
    }
}
