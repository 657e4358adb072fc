// Worker configuration
// Decision: Everything comes from environment variables; `.env` is loaded by main
// Decision: Unparseable values fall back to defaults instead of aborting startup

use std::net::SocketAddr;
use std::time::Duration;

use neofeed_core::subscription::DEFAULT_WATERMARK_CAPACITY;
use neofeed_durable::{PollerConfig, WorkerPoolConfig};
use uuid::Uuid;

use crate::adapters::{EmailSettings, SummarizerSettings};
use crate::pipeline::PipelineSettings;

/// Every five minutes
pub const DEFAULT_DISCOVERY_CRON: &str = "0 */5 * * * *";
/// Sundays at 03:00 UTC
pub const DEFAULT_DISCOVERY_CLEANUP_CRON: &str = "0 0 3 * * Sun";
/// Mondays at 08:00 UTC
pub const DEFAULT_WEEKLY_REPORT_CRON: &str = "0 0 8 * * Mon";

/// Configuration for the neofeed-worker binary
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// PostgreSQL connection string; in-memory stores when unset
    pub database_url: Option<String>,
    pub http_addr: SocketAddr,

    pub worker_id: String,
    pub max_concurrency: usize,
    /// Upper bound of the idle poll backoff
    pub poll_interval: Duration,
    pub stale_threshold: Duration,

    pub discovery_cron: String,
    pub discovery_cleanup_cron: String,
    pub weekly_report_cron: String,

    pub watermark_capacity: usize,
    pub retention: Duration,
    pub dedupe_window: Duration,

    pub fetch_timeout: Duration,
    pub fetch_max_chars: usize,

    pub summarizer: SummarizerSettings,
    pub email: Option<EmailSettings>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            worker_id: format!("worker-{}", Uuid::now_v7()),
            max_concurrency: 10,
            poll_interval: Duration::from_millis(1000),
            stale_threshold: Duration::from_secs(60),
            discovery_cron: DEFAULT_DISCOVERY_CRON.to_string(),
            discovery_cleanup_cron: DEFAULT_DISCOVERY_CLEANUP_CRON.to_string(),
            weekly_report_cron: DEFAULT_WEEKLY_REPORT_CRON.to_string(),
            watermark_capacity: DEFAULT_WATERMARK_CAPACITY,
            retention: Duration::from_secs(30 * 24 * 3600),
            dedupe_window: Duration::from_secs(24 * 3600),
            fetch_timeout: Duration::from_secs(20),
            fetch_max_chars: 15_000,
            summarizer: SummarizerSettings::default(),
            email: None,
        }
    }
}

impl WorkerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let summarizer = SummarizerSettings {
            base_url: env_string("SUMMARIZER_BASE_URL").unwrap_or(defaults.summarizer.base_url),
            api_key: env_string("SUMMARIZER_API_KEY"),
            model: env_string("SUMMARIZER_MODEL").unwrap_or(defaults.summarizer.model),
            timeout: defaults.summarizer.timeout,
        };

        let email = match (env_string("EMAIL_API_KEY"), env_string("EMAIL_SENDER")) {
            (Some(api_key), Some(sender)) => Some(EmailSettings {
                api_url: env_string("EMAIL_API_URL")
                    .unwrap_or_else(|| EmailSettings::DEFAULT_API_URL.to_string()),
                api_key,
                sender,
            }),
            _ => None,
        };

        Self {
            database_url: env_string("DATABASE_URL"),
            http_addr: env_parse("HTTP_ADDR").unwrap_or(defaults.http_addr),
            worker_id: env_string("WORKER_ID").unwrap_or(defaults.worker_id),
            max_concurrency: env_parse("WORKER_MAX_CONCURRENCY").unwrap_or(defaults.max_concurrency),
            poll_interval: env_parse("WORKER_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            stale_threshold: env_parse("WORKER_STALE_THRESHOLD_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_threshold),
            discovery_cron: env_string("DISCOVERY_CRON").unwrap_or(defaults.discovery_cron),
            discovery_cleanup_cron: env_string("DISCOVERY_CLEANUP_CRON")
                .unwrap_or(defaults.discovery_cleanup_cron),
            weekly_report_cron: env_string("WEEKLY_REPORT_CRON")
                .unwrap_or(defaults.weekly_report_cron),
            watermark_capacity: env_parse("DISCOVERY_WATERMARK_CAPACITY")
                .unwrap_or(defaults.watermark_capacity),
            retention: env_parse::<u64>("DISCOVERY_RETENTION_DAYS")
                .map(|days| Duration::from_secs(days * 24 * 3600))
                .unwrap_or(defaults.retention),
            dedupe_window: env_parse("EVENT_DEDUPE_WINDOW_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedupe_window),
            fetch_timeout: env_parse("FETCH_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.fetch_timeout),
            fetch_max_chars: env_parse("FETCH_MAX_CHARS").unwrap_or(defaults.fetch_max_chars),
            summarizer,
            email,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            worker_id: self.worker_id.clone(),
            discovery_cron: self.discovery_cron.clone(),
            discovery_cleanup_cron: self.discovery_cleanup_cron.clone(),
            weekly_report_cron: self.weekly_report_cron.clone(),
            watermark_capacity: self.watermark_capacity,
            retention: self.retention,
            dedupe_window: self.dedupe_window,
            retry_override: None,
        }
    }

    pub fn worker_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::default()
            .with_max_concurrency(self.max_concurrency)
            .with_stale_threshold(self.stale_threshold)
            .with_poller(PollerConfig::default().with_max_interval(self.poll_interval))
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.trim().parse().ok())
}
