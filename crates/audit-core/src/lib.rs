//! Core library for the audit event pipeline: ingestion, integrity
//! hashing, GDPR compliance operations, alerting, and the hot-reloadable
//! config core. `audit-api` and `audit-cli` are thin callers of this
//! crate; no business logic lives in either.

pub mod alerts;
pub mod canonical;
pub mod config;
pub mod error;
pub mod gdpr;
pub mod integrity;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod pseudonym;
pub mod repository;
pub mod resilience;
pub mod security;
pub mod worker;

pub use alerts::{AlertMonitor, AlertQueryFilters, AlertStatistics, ThresholdRule};
pub use config::{Config, ConfigHandle};
pub use error::{Error, ErrorCode, ErrorContext, ErrorMetrics, Result};
pub use gdpr::GdprEngine;
pub use integrity::{IntegrityVerifier, SweepSummary};
pub use jobs::{ClaimedJob, JobId, JobQueue, JobRecord, JobState, QueueStats, RedisJobQueue};
pub use security::EncryptionService;
pub use logging::{LogFormat, MaskingLayer, RingBufferSink};
pub use metrics::{MetricsRegistry, MetricsService};
pub use model::{
    Alert, AlertSeverity, AlertType, AuditEvent, BreakerState, CircuitBreakerStats,
    DataClassification, EventStatus, IntegrityVerification, PseudonymMapping,
    PseudonymStrategy, RetentionPolicy, SessionContext, VerificationStatus,
};
pub use pseudonym::PseudonymRegistry;
pub use repository::{AuditRepository, EventFilter};
pub use worker::{IngestionWorker, WorkerConfig, WorkerMetrics};

// Re-export commonly used types from dependencies
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
