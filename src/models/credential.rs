//! Resolved tenant identity and the secret bundle needed to reach its
//! destination time-series database.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Driver kind for the downstream database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationType {
    InfluxDbV1,
}

impl DestinationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationType::InfluxDbV1 => "influxdb_v1",
        }
    }
}

impl fmt::Display for DestinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DestinationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "influx" | "influxdb" | "influxdb_v1" | "influxdbv1" => Ok(DestinationType::InfluxDbV1),
            other => Err(format!("unsupported destination type '{}'", other)),
        }
    }
}

/// Opaque secret bundle. Wiped from memory on drop; `Debug` never prints it.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secrets {
    url: String,
}

impl Secrets {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Build from the store's native string map. `url` wins over the
    /// legacy `influxdb_url` key.
    pub fn from_map(map: &HashMap<String, String>) -> Option<Self> {
        map.get("url")
            .or_else(|| map.get("influxdb_url"))
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .map(Self::new)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Host portion of the URL, safe to log.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets").field("url", &"<redacted>").finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRecord {
    pub token: String,
    pub name: String,
    pub destination_type: DestinationType,
    pub secrets: Secrets,
    pub fetched_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub fn new(
        token: impl Into<String>,
        name: impl Into<String>,
        destination_type: DestinationType,
        secrets: Secrets,
    ) -> Self {
        Self {
            token: token.into(),
            name: name.into(),
            destination_type,
            secrets,
            fetched_at: Utc::now(),
        }
    }

    /// Returns the reason this record must not be used or cached.
    pub fn validate(&self) -> Result<(), String> {
        if self.token.is_empty() {
            return Err("empty token".into());
        }
        if self.name.trim().is_empty() {
            return Err("empty name".into());
        }
        if self.secrets.url().is_empty() {
            return Err("empty destination url".into());
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}
