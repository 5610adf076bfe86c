//! Ingestion pipeline: resolve the tenant, parse the batch, decode metrics,
//! write them to the tenant's destination.
//!
//! A batch whose token does not resolve is dropped as a whole with the
//! reason recorded; nothing is retried in-process.

pub mod metric;
pub mod parser;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::destination::{WriteError, WriterFactory};
use crate::metrics::Metrics;
use crate::resolver::{ResolveError, Resolver};
use metric::Metric;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl IngestError {
    fn reason(&self) -> &'static str {
        match self {
            IngestError::Resolve(e) => e.kind(),
            IngestError::Write(_) => "write_failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub lines: usize,
    pub unparsed: usize,
    pub skipped: usize,
    pub points: usize,
}

pub struct Pipeline {
    resolver: Arc<Resolver>,
    writers: Arc<dyn WriterFactory>,
    metrics: Option<Metrics>,
}

impl Pipeline {
    pub fn new(resolver: Arc<Resolver>, writers: Arc<dyn WriterFactory>) -> Self {
        Self {
            resolver,
            writers,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    #[tracing::instrument(skip(self, token, body), fields(bytes = body.len()))]
    pub async fn ingest(&self, token: &str, body: &str) -> Result<IngestReport, IngestError> {
        let result = self.run(token, body).await;
        if let Err(e) = &result {
            tracing::warn!(token = %token, reason = e.reason(), error = %e, "dropping ingress batch");
            if let Some(m) = &self.metrics {
                m.record_dropped_batch(e.reason());
            }
        }
        result
    }

    async fn run(&self, token: &str, body: &str) -> Result<IngestReport, IngestError> {
        let creds = self.resolver.resolve(token).await?;

        let (points, mut report) = extract(body);
        if let Some(m) = &self.metrics {
            m.record_lines(report.lines as u64);
        }
        if points.is_empty() {
            return Ok(report);
        }

        let writer = self.writers.writer_for(&creds)?;
        writer.write(&points).await?;

        report.points = points.len();
        if let Some(m) = &self.metrics {
            m.record_points_written(report.points as u64);
        }
        tracing::debug!(tenant = %creds.name, points = report.points, "batch written");
        Ok(report)
    }
}

/// Parse and decode a newline-separated batch. Bad lines are counted, not fatal.
pub fn extract(body: &str) -> (Vec<Metric>, IngestReport) {
    let mut report = IngestReport::default();
    let mut points = Vec::new();

    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        report.lines += 1;
        match parser::parse_line(line) {
            Ok(record) => match Metric::from_record(&record) {
                Some(m) => points.push(m),
                None => report.skipped += 1,
            },
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable line");
                report.unparsed += 1;
            }
        }
    }
    (points, report)
}
