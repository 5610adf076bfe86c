//! Shared test doubles.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use logsnarf::credentials::{BackendError, CredentialBackend};
use logsnarf::models::credential::{CredentialRecord, DestinationType, Secrets};

/// What the fake store answers for a token.
#[derive(Clone)]
pub enum Answer {
    Record { name: String, url: String },
    Fail(BackendError),
    Hang,
}

/// In-memory backend that counts and logs every lookup.
#[derive(Default)]
pub struct CountingBackend {
    answers: Mutex<HashMap<String, Answer>>,
    calls: AtomicUsize,
    log: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl CountingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_tenants(tokens: &[&str]) -> Arc<Self> {
        let backend = Self::new();
        for t in tokens {
            backend.tenant(t, &format!("tenant-{}", t));
        }
        backend
    }

    pub fn tenant(&self, token: &str, name: &str) {
        self.answer(
            token,
            Answer::Record {
                name: name.to_string(),
                url: format!("http://{}.influx.test:8086", token.to_lowercase()),
            },
        );
    }

    pub fn answer(&self, token: &str, answer: Answer) {
        self.answers.lock().insert(token.to_string(), answer);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, token: &str) -> usize {
        self.log.lock().iter().filter(|t| *t == token).count()
    }

    pub fn call_log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl CredentialBackend for CountingBackend {
    async fn request(&self, token: &str) -> Result<CredentialRecord, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(token.to_string());

        let delay = *self.delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let answer = self.answers.lock().get(token).cloned();
        match answer {
            Some(Answer::Record { name, url }) => Ok(CredentialRecord::new(
                token,
                name,
                DestinationType::InfluxDbV1,
                Secrets::new(url),
            )),
            Some(Answer::Fail(e)) => Err(e),
            Some(Answer::Hang) => std::future::pending().await,
            None => Err(BackendError::NotFound),
        }
    }

    fn kind(&self) -> &'static str {
        "counting"
    }
}
