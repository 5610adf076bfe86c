pub mod file;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::credential::{CredentialRecord, DestinationType, Secrets};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// The store authoritatively has no entry for the token.
    #[error("no credentials stored for token")]
    NotFound,

    /// Transport or store fault: timeout, auth failure, undecodable response.
    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    /// An entry exists but cannot be turned into credentials.
    #[error("stored credentials are invalid: {0}")]
    Invalid(String),
}

/// Abstraction over durable credential stores.
/// Implementations: PgCredentialBackend (SQL table), FileBackend (YAML file).
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    /// One round-trip to the store. `token` is never empty here; the
    /// resolver rejects empty tokens before calling.
    async fn request(&self, token: &str) -> Result<CredentialRecord, BackendError>;

    /// Short label for logs and metrics.
    fn kind(&self) -> &'static str;
}

/// Native shape of a store entry, shared by every adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub token: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub destination_type: String,
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

impl StoredCredential {
    /// Convert to a record. An empty name passes through so the resolver can
    /// classify it; an unknown driver or missing URL cannot be represented.
    pub fn into_record(self) -> Result<CredentialRecord, BackendError> {
        let destination_type = self
            .destination_type
            .parse::<DestinationType>()
            .map_err(BackendError::Invalid)?;
        let secrets = Secrets::from_map(&self.secrets)
            .ok_or_else(|| BackendError::Invalid("missing destination url".into()))?;

        Ok(CredentialRecord::new(
            self.token,
            self.name,
            destination_type,
            secrets,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(kind: &str, secrets: &[(&str, &str)]) -> StoredCredential {
        StoredCredential {
            token: "tok".into(),
            name: "acme".into(),
            destination_type: kind.into(),
            secrets: secrets
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_into_record() {
        let rec = stored("influx", &[("url", "http://db:8086")]).into_record().unwrap();
        assert_eq!(rec.token, "tok");
        assert_eq!(rec.destination_type, DestinationType::InfluxDbV1);
        assert_eq!(rec.secrets.url(), "http://db:8086");
    }

    #[test]
    fn test_into_record_rejects_unknown_driver_and_missing_url() {
        assert!(matches!(
            stored("carbon", &[("url", "http://db")]).into_record(),
            Err(BackendError::Invalid(_))
        ));
        assert!(matches!(
            stored("influx", &[]).into_record(),
            Err(BackendError::Invalid(_))
        ));
    }

    #[test]
    fn test_empty_name_passes_through() {
        let mut s = stored("influx", &[("url", "http://db")]);
        s.name = String::new();
        let rec = s.into_record().unwrap();
        assert!(!rec.is_valid());
    }
}
