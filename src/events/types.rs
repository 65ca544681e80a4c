//! Domain events and the DTOs they carry onto the wire.

use serde::Serialize;
use ts_rs::TS;

use crate::data::models::{ScrapeJob, ScrapeJobStatus, ScrapePriority, TargetType};

/// Unified enum for all domain events flowing through the event buffer.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    ScrapeJob(ScrapeJobEvent),
    AuditLog(AuditLogEvent),
}

/// A serializable view of a `ScrapeJob` with its computed `status`.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ScrapeJobDto {
    pub id: i32,
    pub target_type: TargetType,
    pub target_payload: serde_json::Value,
    pub priority: ScrapePriority,
    pub queued_at: String,
    pub execute_at: String,
    pub locked_at: Option<String>,
    pub exhausted_at: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: String,
    pub status: ScrapeJobStatus,
}

impl From<&ScrapeJob> for ScrapeJobDto {
    fn from(job: &ScrapeJob) -> Self {
        Self {
            id: job.id,
            target_type: job.target_type,
            target_payload: job.target_payload.clone(),
            priority: job.priority,
            queued_at: job.queued_at.to_rfc3339(),
            execute_at: job.execute_at.to_rfc3339(),
            locked_at: job.locked_at.map(|t| t.to_rfc3339()),
            exhausted_at: job.exhausted_at.map(|t| t.to_rfc3339()),
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            created_at: job.created_at.to_rfc3339(),
            status: job.status(),
        }
    }
}

/// Job lifecycle events broadcast to the `scrapeJobs` stream.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "type", rename_all = "camelCase")]
#[ts(export)]
pub enum ScrapeJobEvent {
    Created {
        job: ScrapeJobDto,
    },
    Locked {
        id: i32,
        #[serde(rename = "lockedAt")]
        locked_at: String,
        status: ScrapeJobStatus,
    },
    Completed {
        id: i32,
        subject: Option<String>,
    },
    Retried {
        id: i32,
        #[serde(rename = "retryCount")]
        retry_count: i32,
        #[serde(rename = "queuedAt")]
        queued_at: String,
        #[serde(rename = "executeAt")]
        execute_at: String,
        status: ScrapeJobStatus,
    },
    Exhausted {
        id: i32,
    },
    StaleLock {
        id: i32,
        status: ScrapeJobStatus,
    },
    Deleted {
        id: i32,
    },
}

impl ScrapeJobEvent {
    /// The job id the event refers to.
    pub fn job_id(&self) -> i32 {
        match self {
            ScrapeJobEvent::Created { job } => job.id,
            ScrapeJobEvent::Locked { id, .. }
            | ScrapeJobEvent::Completed { id, .. }
            | ScrapeJobEvent::Retried { id, .. }
            | ScrapeJobEvent::Exhausted { id }
            | ScrapeJobEvent::StaleLock { id, .. }
            | ScrapeJobEvent::Deleted { id } => *id,
        }
    }
}

/// A single audit record enriched with course identity, as sent to clients.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AuditLogEntry {
    pub id: i32,
    pub course_id: i32,
    pub timestamp: String,
    pub field_changed: String,
    pub old_value: String,
    pub new_value: String,
    pub subject: Option<String>,
    pub course_number: Option<String>,
    pub crn: Option<String>,
    pub course_title: Option<String>,
    pub term_code: Option<String>,
}

/// Audit log event carrying the batch of entries one ingest produced.
#[derive(Debug, Clone)]
pub struct AuditLogEvent {
    pub entries: Vec<AuditLogEntry>,
}
