//! Time-series query surface used by the dashboard scanner.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use flotilla_common::{FleetError, MetricsSample, Result};

/// Small query surface over the host time-series backend.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Whether a backend is configured at all. When disabled, no samples
    /// means no alert.
    fn is_enabled(&self) -> bool;

    /// Aggregated samples for `[start, end)` bucketed by `window`, ordered
    /// by timestamp ascending.
    async fn query_host_metrics(
        &self,
        host_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<MetricsSample>>;

    /// Ingest one pushed sample.
    async fn record_sample(&self, host_id: Uuid, sample: &MetricsSample) -> Result<()>;
}

/// Disabled backend: reports disabled, returns nothing, drops ingests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

#[async_trait]
impl MetricsProvider for NoopMetrics {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn query_host_metrics(
        &self,
        _host_id: Uuid,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _window: Duration,
    ) -> Result<Vec<MetricsSample>> {
        Ok(Vec::new())
    }

    async fn record_sample(&self, _host_id: Uuid, _sample: &MetricsSample) -> Result<()> {
        Ok(())
    }
}

/// In-memory backend for DEV mode and tests.
#[derive(Default)]
pub struct MemoryMetrics {
    samples: RwLock<HashMap<Uuid, Vec<MetricsSample>>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsProvider for MemoryMetrics {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn query_host_metrics(
        &self,
        host_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<MetricsSample>> {
        let samples = self.samples.read().await;
        let Some(host_samples) = samples.get(&host_id) else {
            return Ok(Vec::new());
        };
        let window_secs = window.as_secs().max(1) as i64;

        // Bucket by window start, average within each bucket.
        let mut buckets: HashMap<i64, (MetricsSample, u32)> = HashMap::new();
        for sample in host_samples
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp < end)
        {
            let bucket = sample.timestamp.timestamp() / window_secs * window_secs;
            let entry = buckets.entry(bucket).or_insert_with(|| {
                (
                    MetricsSample {
                        timestamp: Utc.timestamp_opt(bucket, 0).single().unwrap_or(sample.timestamp),
                        cpu_percent: 0.0,
                        memory_usage: 0,
                        memory_total: 0,
                        disk_usage: 0,
                        disk_total: 0,
                    },
                    0,
                )
            });
            entry.0.cpu_percent += sample.cpu_percent;
            entry.0.memory_usage += sample.memory_usage;
            entry.0.memory_total += sample.memory_total;
            entry.0.disk_usage += sample.disk_usage;
            entry.0.disk_total += sample.disk_total;
            entry.1 += 1;
        }

        let mut result: Vec<MetricsSample> = buckets
            .into_values()
            .map(|(mut acc, count)| {
                let n = count.max(1) as u64;
                acc.cpu_percent /= n as f64;
                acc.memory_usage /= n;
                acc.memory_total /= n;
                acc.disk_usage /= n;
                acc.disk_total /= n;
                acc
            })
            .collect();
        result.sort_by_key(|s| s.timestamp);
        Ok(result)
    }

    async fn record_sample(&self, host_id: Uuid, sample: &MetricsSample) -> Result<()> {
        self.samples
            .write()
            .await
            .entry(host_id)
            .or_default()
            .push(sample.clone());
        Ok(())
    }
}

/// Postgres-backed time-series store over the `host_metrics` table.
pub struct PostgresMetrics {
    pool: PgPool,
}

impl PostgresMetrics {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn clamp_i64(value: u64) -> i64 {
    value.min(i64::MAX as u64) as i64
}

fn clamp_u64(value: f64) -> u64 {
    if value <= 0.0 {
        0
    } else if value >= u64::MAX as f64 {
        u64::MAX
    } else {
        value as u64
    }
}

#[async_trait]
impl MetricsProvider for PostgresMetrics {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn query_host_metrics(
        &self,
        host_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<MetricsSample>> {
        let window_secs = window.as_secs().max(1) as f64;
        let rows = sqlx::query_as::<_, (DateTime<Utc>, f64, f64, f64, f64, f64)>(
            "SELECT to_timestamp(floor(extract(epoch FROM recorded_at) / $4) * $4) AS bucket, \
               avg(cpu_percent)::double precision, \
               avg(memory_usage)::double precision, \
               avg(memory_total)::double precision, \
               avg(disk_usage)::double precision, \
               avg(disk_total)::double precision \
             FROM host_metrics \
             WHERE host_id = $1 AND recorded_at >= $2 AND recorded_at < $3 \
             GROUP BY bucket ORDER BY bucket",
        )
        .bind(host_id)
        .bind(start)
        .bind(end)
        .bind(window_secs)
        .fetch_all(&self.pool)
        .await
        .map_err(FleetError::persistence)?;

        Ok(rows
            .into_iter()
            .map(
                |(timestamp, cpu, mem_usage, mem_total, disk_usage, disk_total)| MetricsSample {
                    timestamp,
                    cpu_percent: cpu,
                    memory_usage: clamp_u64(mem_usage),
                    memory_total: clamp_u64(mem_total),
                    disk_usage: clamp_u64(disk_usage),
                    disk_total: clamp_u64(disk_total),
                },
            )
            .collect())
    }

    async fn record_sample(&self, host_id: Uuid, sample: &MetricsSample) -> Result<()> {
        sqlx::query(
            "INSERT INTO host_metrics (host_id, recorded_at, cpu_percent, memory_usage, \
               memory_total, disk_usage, disk_total) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(host_id)
        .bind(sample.timestamp)
        .bind(sample.cpu_percent)
        .bind(clamp_i64(sample.memory_usage))
        .bind(clamp_i64(sample.memory_total))
        .bind(clamp_i64(sample.disk_usage))
        .bind(clamp_i64(sample.disk_total))
        .execute(&self.pool)
        .await
        .map_err(FleetError::persistence)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(offset_secs: i64, base: DateTime<Utc>, memory_usage: u64) -> MetricsSample {
        MetricsSample {
            timestamp: base + chrono::Duration::seconds(offset_secs),
            cpu_percent: 50.0,
            memory_usage,
            memory_total: 1000,
            disk_usage: 0,
            disk_total: 0,
        }
    }

    #[tokio::test]
    async fn memory_metrics_buckets_and_averages() {
        let metrics = MemoryMetrics::new();
        let host = Uuid::new_v4();
        let base = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();

        for (offset, usage) in [(0, 100), (10, 300), (300, 500)] {
            metrics
                .record_sample(host, &sample(offset, base, usage))
                .await
                .unwrap();
        }

        let samples = metrics
            .query_host_metrics(
                host,
                base - chrono::Duration::minutes(1),
                base + chrono::Duration::minutes(15),
                Duration::from_secs(300),
            )
            .await
            .unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].memory_usage, 200, "first bucket averages 100 and 300");
        assert_eq!(samples[1].memory_usage, 500);
        assert!(samples[0].timestamp < samples[1].timestamp);
    }

    #[tokio::test]
    async fn memory_metrics_respects_range() {
        let metrics = MemoryMetrics::new();
        let host = Uuid::new_v4();
        let base = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        metrics.record_sample(host, &sample(0, base, 1)).await.unwrap();

        let samples = metrics
            .query_host_metrics(
                host,
                base + chrono::Duration::minutes(1),
                base + chrono::Duration::minutes(2),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert!(samples.is_empty());
    }
}
