pub mod influxdb_v1;

use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::time::Duration;
use thiserror::Error;

use crate::ingest::metric::Metric;
use crate::models::credential::{CredentialRecord, DestinationType};

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("invalid destination url: {0}")]
    BadUrl(String),

    #[error("destination request failed: {0}")]
    Transport(String),

    #[error("destination rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// A session against one tenant's destination database.
#[async_trait]
pub trait MetricWriter: Send + Sync {
    async fn write(&self, metrics: &[Metric]) -> Result<(), WriteError>;
}

/// Opens writers for resolved credentials.
pub trait WriterFactory: Send + Sync {
    fn writer_for(&self, creds: &CredentialRecord) -> Result<Box<dyn MetricWriter>, WriteError>;
}

/// HTTP writers sharing one pooled client with transient-error retries.
#[derive(Clone)]
pub struct HttpWriterFactory {
    client: ClientWithMiddleware,
}

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

impl HttpWriterFactory {
    pub fn new(timeout: Duration, max_retries: u32) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);

        let client = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { client })
    }
}

impl WriterFactory for HttpWriterFactory {
    fn writer_for(&self, creds: &CredentialRecord) -> Result<Box<dyn MetricWriter>, WriteError> {
        match creds.destination_type {
            DestinationType::InfluxDbV1 => Ok(Box::new(influxdb_v1::InfluxDbV1Writer::new(
                self.client.clone(),
                creds.secrets.url(),
            )?)),
        }
    }
}
