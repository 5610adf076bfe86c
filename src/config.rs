use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::resolver::ResolverConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    Postgres,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub backend: BackendKind,
    pub database_url: String,
    pub credentials_table: String,
    pub credentials_file: PathBuf,
    /// Max cached tenants. Set via LOGSNARF_CACHE_CAPACITY. Default: 1000.
    pub cache_capacity: NonZeroUsize,
    /// Optional expiry for cached credentials. Unset = capacity eviction only.
    pub cache_ttl: Option<Duration>,
    pub backend_timeout: Duration,
    pub coalesce_misses: bool,
    pub log_format: LogFormat,
}

impl Config {
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            cache_capacity: self.cache_capacity,
            cache_ttl: self.cache_ttl,
            backend_timeout: self.backend_timeout,
            coalesce_misses: self.coalesce_misses,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    load_from(|key| std::env::var(key).ok())
}

/// Build a config from an arbitrary variable lookup.
pub fn load_from(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    let backend = match var("LOGSNARF_CREDENTIALS_BACKEND")
        .unwrap_or_else(|| "postgres".into())
        .to_ascii_lowercase()
        .as_str()
    {
        "postgres" | "postgresql" => BackendKind::Postgres,
        "file" => BackendKind::File,
        other => anyhow::bail!(
            "LOGSNARF_CREDENTIALS_BACKEND must be 'postgres' or 'file', got '{}'",
            other
        ),
    };

    let cache_capacity = parse_or(&var, "LOGSNARF_CACHE_CAPACITY", 1000usize)?;
    let cache_capacity = NonZeroUsize::new(cache_capacity)
        .context("LOGSNARF_CACHE_CAPACITY must be a positive integer")?;

    let cache_ttl = match var("LOGSNARF_CACHE_TTL_SECS") {
        Some(v) => {
            let secs: u64 = v
                .trim()
                .parse()
                .with_context(|| format!("invalid LOGSNARF_CACHE_TTL_SECS: {:?}", v))?;
            (secs > 0).then(|| Duration::from_secs(secs))
        }
        None => None,
    };

    let log_format = match var("LOGSNARF_LOG_FORMAT").as_deref() {
        Some("json") => LogFormat::Json,
        _ => LogFormat::Text,
    };

    Ok(Config {
        port: parse_or(&var, "LOGSNARF_PORT", 3030u16)?,
        backend,
        database_url: var("DATABASE_URL")
            .unwrap_or_else(|| "postgres://localhost/logsnarf".into()),
        credentials_table: var("LOGSNARF_CREDENTIALS_TABLE")
            .unwrap_or_else(|| "credentials".into()),
        credentials_file: var("LOGSNARF_CREDENTIALS_FILE")
            .unwrap_or_else(|| "credentials.yaml".into())
            .into(),
        cache_capacity,
        cache_ttl,
        backend_timeout: Duration::from_millis(parse_or(
            &var,
            "LOGSNARF_BACKEND_TIMEOUT_MS",
            5000u64,
        )?),
        coalesce_misses: parse_or(&var, "LOGSNARF_COALESCE_MISSES", true)?,
        log_format,
    })
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", key, v, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_with(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        load_from(|k| env.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = load_with(&[]).unwrap();
        assert_eq!(cfg.port, 3030);
        assert_eq!(cfg.backend, BackendKind::Postgres);
        assert_eq!(cfg.credentials_table, "credentials");
        assert_eq!(cfg.cache_capacity.get(), 1000);
        assert_eq!(cfg.cache_ttl, None);
        assert_eq!(cfg.backend_timeout, Duration::from_secs(5));
        assert!(cfg.coalesce_misses);
        assert_eq!(cfg.log_format, LogFormat::Text);
    }

    #[test]
    fn test_overrides() {
        let cfg = load_with(&[
            ("LOGSNARF_CREDENTIALS_BACKEND", "file"),
            ("LOGSNARF_CREDENTIALS_FILE", "/etc/logsnarf/creds.yaml"),
            ("LOGSNARF_CACHE_CAPACITY", "1"),
            ("LOGSNARF_CACHE_TTL_SECS", "900"),
            ("LOGSNARF_BACKEND_TIMEOUT_MS", "250"),
            ("LOGSNARF_COALESCE_MISSES", "false"),
            ("LOGSNARF_LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(cfg.backend, BackendKind::File);
        assert_eq!(cfg.credentials_file, PathBuf::from("/etc/logsnarf/creds.yaml"));
        assert_eq!(cfg.cache_capacity.get(), 1);
        assert_eq!(cfg.cache_ttl, Some(Duration::from_secs(900)));
        assert_eq!(cfg.backend_timeout, Duration::from_millis(250));
        assert!(!cfg.coalesce_misses);
        assert_eq!(cfg.log_format, LogFormat::Json);

        let rc = cfg.resolver_config();
        assert_eq!(rc.cache_capacity.get(), 1);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(load_with(&[("LOGSNARF_CACHE_CAPACITY", "0")]).is_err());
        assert!(load_with(&[("LOGSNARF_CACHE_CAPACITY", "-3")]).is_err());
        assert!(load_with(&[("LOGSNARF_PORT", "http")]).is_err());
        assert!(load_with(&[("LOGSNARF_CREDENTIALS_BACKEND", "dynamo")]).is_err());
    }
}
