//! Stream WebSocket protocol types and messages.
//!
//! Framing is JSON text frames with a discriminated `type` field. Client
//! identifiers (`request_id`) are opaque strings echoed back on acks and
//! errors; subscription ids are allocated server-side.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::data::scraper_stats::{ScraperStats, SubjectSummary, TimeseriesPoint};
use crate::events::{AuditLogEntry, ScrapeJobDto, ScrapeJobEvent};
use crate::stream::filters::{
    AuditLogFilter, ScrapeJobsFilter, ScraperSubjectsFilter, ScraperTimeseriesFilter,
};

pub const STREAM_PROTOCOL_VERSION: u32 = 1;

/// The five typed streams the hub serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum StreamKind {
    ScrapeJobs,
    AuditLog,
    ScraperStats,
    ScraperTimeseries,
    ScraperSubjects,
}

/// Per-stream filters, tagged by stream kind.
///
/// `scraperStats` is a singleton and takes no filter.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "stream", rename_all = "camelCase")]
#[ts(export)]
pub enum StreamFilter {
    ScrapeJobs(ScrapeJobsFilter),
    AuditLog(AuditLogFilter),
    ScraperTimeseries(ScraperTimeseriesFilter),
    ScraperSubjects(ScraperSubjectsFilter),
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "camelCase")]
#[ts(export)]
pub enum StreamClientMessage {
    Subscribe {
        request_id: String,
        stream: StreamKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<StreamFilter>,
    },
    Modify {
        request_id: String,
        subscription_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<StreamFilter>,
    },
    Unsubscribe {
        request_id: String,
        subscription_id: String,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum StreamErrorCode {
    InvalidMessage,
    InvalidFilter,
    UnknownSubscription,
    InternalError,
}

/// Key identifying a subject summary for removals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SubjectKey {
    pub subject: String,
    pub term: String,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "stream", rename_all = "camelCase")]
#[ts(export)]
pub enum StreamSnapshot {
    ScrapeJobs {
        jobs: Vec<ScrapeJobDto>,
    },
    AuditLog {
        entries: Vec<AuditLogEntry>,
    },
    ScraperStats {
        stats: ScraperStats,
    },
    ScraperTimeseries {
        points: Vec<TimeseriesPoint>,
        period: String,
        bucket: String,
    },
    ScraperSubjects {
        subjects: Vec<SubjectSummary>,
    },
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "stream", rename_all = "camelCase")]
#[ts(export)]
pub enum StreamDelta {
    ScrapeJobs {
        event: ScrapeJobEvent,
    },
    AuditLog {
        entries: Vec<AuditLogEntry>,
    },
    ScraperStats {
        stats: ScraperStats,
    },
    ScraperTimeseries {
        points: Vec<TimeseriesPoint>,
        period: String,
        bucket: String,
    },
    ScraperSubjects {
        changed: Vec<SubjectSummary>,
        removed: Vec<SubjectKey>,
    },
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "type", rename_all = "camelCase")]
#[ts(export)]
pub enum StreamServerMessage {
    Ready {
        protocol_version: u32,
    },
    Subscribed {
        request_id: String,
        subscription_id: String,
        stream: StreamKind,
    },
    Modified {
        request_id: String,
        subscription_id: String,
    },
    Unsubscribed {
        request_id: String,
        subscription_id: String,
    },
    Snapshot {
        subscription_id: String,
        snapshot: StreamSnapshot,
    },
    Delta {
        subscription_id: String,
        delta: StreamDelta,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        code: StreamErrorCode,
        message: String,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
}

/// A protocol-level error sent to the client.
#[derive(Debug, Clone)]
pub struct StreamError {
    pub code: StreamErrorCode,
    pub message: String,
}

impl StreamError {
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self {
            code: StreamErrorCode::InvalidFilter,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribe_message_parses() {
        let raw = json!({
            "type": "subscribe",
            "request_id": "r1",
            "stream": "scrapeJobs",
            "filter": {"stream": "scrapeJobs", "status": ["pending"]}
        });
        let msg: StreamClientMessage = serde_json::from_value(raw).unwrap();
        let StreamClientMessage::Subscribe { request_id, stream, filter } = msg else {
            panic!("expected subscribe");
        };
        assert_eq!(request_id, "r1");
        assert_eq!(stream, StreamKind::ScrapeJobs);
        assert!(filter.is_some());
    }

    #[test]
    fn ping_without_fields_parses() {
        let msg: StreamClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, StreamClientMessage::Ping { .. }));
    }

    #[test]
    fn error_frame_omits_missing_request_id() {
        let msg = StreamServerMessage::Error {
            request_id: None,
            code: StreamErrorCode::InvalidMessage,
            message: "bad".into(),
        };
        let raw = serde_json::to_value(&msg).unwrap();
        assert_eq!(raw["type"], "error");
        assert!(raw.get("request_id").is_none());
    }

    #[test]
    fn snapshot_frame_is_tagged_by_stream() {
        let msg = StreamServerMessage::Snapshot {
            subscription_id: "1".into(),
            snapshot: StreamSnapshot::AuditLog { entries: vec![] },
        };
        let raw = serde_json::to_value(&msg).unwrap();
        assert_eq!(raw["type"], "snapshot");
        assert_eq!(raw["snapshot"]["stream"], "auditLog");
    }
}
