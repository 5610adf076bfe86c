use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

use super::{MetricWriter, WriteError};
use crate::ingest::metric::Metric;

const DEFAULT_DATABASE: &str = "logsnarf";

/// Writes points to an InfluxDB 1.x `/write` endpoint.
///
/// The destination URL carries everything: userinfo becomes `u`/`p`, and an
/// optional `db` query parameter picks the database.
pub struct InfluxDbV1Writer {
    client: ClientWithMiddleware,
    write_url: Url,
}

impl InfluxDbV1Writer {
    pub fn new(client: ClientWithMiddleware, destination: &str) -> Result<Self, WriteError> {
        let base = Url::parse(destination).map_err(|e| WriteError::BadUrl(e.to_string()))?;
        Ok(Self {
            client,
            write_url: write_url(&base)?,
        })
    }
}

fn write_url(base: &Url) -> Result<Url, WriteError> {
    if !matches!(base.scheme(), "http" | "https") {
        return Err(WriteError::BadUrl(format!("unsupported scheme '{}'", base.scheme())));
    }

    let database = base
        .query_pairs()
        .find(|(k, _)| k == "db")
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| DEFAULT_DATABASE.to_string());
    let user = base.username().to_string();
    let password = base.password().map(str::to_string);

    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    let _ = url.set_username("");
    let _ = url.set_password(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    let mut url = url
        .join("write")
        .map_err(|e| WriteError::BadUrl(e.to_string()))?;

    {
        let mut q = url.query_pairs_mut();
        q.append_pair("db", &database);
        q.append_pair("precision", "u");
        if !user.is_empty() {
            q.append_pair("u", &user);
        }
        if let Some(p) = &password {
            q.append_pair("p", p);
        }
    }
    Ok(url)
}

#[async_trait]
impl MetricWriter for InfluxDbV1Writer {
    #[tracing::instrument(skip_all, fields(count = metrics.len(), host = self.write_url.host_str().unwrap_or("")))]
    async fn write(&self, metrics: &[Metric]) -> Result<(), WriteError> {
        if metrics.is_empty() {
            return Ok(());
        }

        let mut body = String::with_capacity(metrics.len() * 128);
        for m in metrics {
            m.write_line_protocol(&mut body);
        }

        let response = self
            .client
            .post(self.write_url.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("influxdb write failed after retries: {}", e);
                WriteError::Transport(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WriteError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!("wrote {} points to influxdb", metrics.len());
        Ok(())
    }
}
