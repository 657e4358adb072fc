// NeoFeed core abstractions
//
// Domain types and collaborator traits shared by the storage and worker
// crates. Nothing here knows about a database or an HTTP client.
//
// Key design decisions:
// - Stores and external collaborators are traits (traits.rs) with in-memory
//   implementations (memory.rs) for tests and database-less runs
// - FeedRecords are unique per (user_id, fingerprint); upsert_feed is idempotent
// - Collaborator errors convert into durable StepErrors, which decide retries
// - Weekly report eligibility is an explicit preference, not derived from AI config

pub mod content;
pub mod error;
pub mod feed;
pub mod fingerprint;
pub mod report;
pub mod subscription;
pub mod telemetry;
pub mod traits;
pub mod user;

// In-memory implementations for local runs and testing
pub mod memory;

// Re-exports for convenience
pub use content::{AiConfig, CaptureInput, FetchedContent, Summary};
pub use error::{DeliveryError, FetchError, Result, StorageError, SummarizeError};
pub use feed::{Category, DateRange, Enrichment, FeedRecord, FeedSource, NewFeed, UpsertOutcome};
pub use fingerprint::{capture_dedupe_key, content_fingerprint};
pub use report::{Digest, RenderedReport, WeekWindow, WeeklyReport, REPORTS_KEPT_PER_USER};
pub use subscription::{
    FeedItem, PollFrequency, SubscriptionState, Watermark, DEFAULT_WATERMARK_CAPACITY,
    MAX_ITEMS_PER_POLL,
};
pub use traits::{
    ContentFetcher, FeedReader, FeedStore, NotificationSender, ReportStore, Summarizer,
    SubscriptionStore, UserDirectory,
};
pub use user::{NotificationChannel, ReportPreferences, ReportTarget, UserProfile};
