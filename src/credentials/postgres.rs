use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;

use super::{BackendError, CredentialBackend, StoredCredential};
use crate::models::credential::CredentialRecord;

/// Credential store backed by a Postgres table keyed by token.
#[derive(Clone)]
pub struct PgCredentialBackend {
    pool: PgPool,
    table: String,
}

impl PgCredentialBackend {
    /// Connect with a pool whose acquire timeout matches the lookup timeout,
    /// so an exhausted pool fails the lookup instead of queueing forever.
    pub async fn connect(
        database_url: &str,
        table: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(timeout)
            .connect(database_url)
            .await?;
        Self::new(pool, table)
    }

    pub fn new(pool: PgPool, table: &str) -> anyhow::Result<Self> {
        if !is_identifier(table) {
            anyhow::bail!("invalid credentials table name: {:?}", table);
        }
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- Provisioning --

    pub async fn upsert(&self, cred: &StoredCredential) -> anyhow::Result<()> {
        let sql = format!(
            r#"INSERT INTO {} (token, name, type, secrets)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (token) DO UPDATE
               SET name = EXCLUDED.name, type = EXCLUDED.type, secrets = EXCLUDED.secrets, updated_at = NOW()"#,
            self.table
        );
        sqlx::query(&sql)
            .bind(&cred.token)
            .bind(&cred.name)
            .bind(&cred.destination_type)
            .bind(Json(&cred.secrets))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove(&self, token: &str) -> anyhow::Result<bool> {
        let sql = format!("DELETE FROM {} WHERE token = $1", self.table);
        let result = sqlx::query(&sql).bind(token).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CredentialBackend for PgCredentialBackend {
    #[tracing::instrument(skip(self, token), fields(table = %self.table))]
    async fn request(&self, token: &str) -> Result<CredentialRecord, BackendError> {
        let sql = format!(
            "SELECT name, type, secrets FROM {} WHERE token = $1 LIMIT 1",
            self.table
        );
        let row = sqlx::query_as::<_, CredentialRow>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("credential lookup failed: {}", e);
                BackendError::Unavailable(e.to_string())
            })?
            .ok_or(BackendError::NotFound)?;

        StoredCredential {
            token: token.to_string(),
            name: row.name,
            destination_type: row.r#type,
            secrets: row.secrets.0,
        }
        .into_record()
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    name: String,
    r#type: String,
    secrets: Json<HashMap<String, String>>,
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_validation() {
        assert!(is_identifier("credentials"));
        assert!(is_identifier("logsnarf_config"));
        assert!(is_identifier("_t1"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1table"));
        assert!(!is_identifier("creds; DROP TABLE x"));
        assert!(!is_identifier("public.credentials"));
    }

    #[tokio::test]
    async fn test_new_rejects_bad_table() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/logsnarf")
            .unwrap();
        assert!(PgCredentialBackend::new(pool.clone(), "bad-name").is_err());
        let backend = PgCredentialBackend::new(pool, "credentials").unwrap();
        assert_eq!(backend.kind(), "postgres");
    }
}
