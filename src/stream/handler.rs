//! Stream WebSocket gateway.
//!
//! One long-lived connection per client. The handler owns the connection's
//! subscription registry, tails the hub's event ring, and relays computed
//! updates. A connection idle for more than a minute (no client frames at
//! all) is closed; a connection that lags the event ring is resynchronized
//! with fresh snapshots instead of replaying lost deltas.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::debug;

use crate::data::scraper_stats::{
    compute_stats, compute_subjects, compute_timeseries, default_bucket_for_period,
    SubjectSummary,
};
use crate::events::{AuditLogEvent, DomainEvent, ScrapeJobEvent};
use crate::state::AppState;
use crate::stream::computed::{ComputedCacheKey, ComputedUpdate, STATS_PERIOD};
use crate::stream::filters::ScraperSubjectsFilter;
use crate::stream::protocol::{
    StreamClientMessage, StreamDelta, StreamError, StreamErrorCode, StreamKind,
    StreamServerMessage, StreamSnapshot, STREAM_PROTOCOL_VERSION,
};
use crate::stream::streams::{audit_log, scrape_jobs};
use crate::stream::subscriptions::{build_subscription, Subscription, SubscriptionRegistry};

/// Connections without any client frame for this long are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

type Sink = SplitSink<WebSocket, Message>;

/// Outcome of processing a single client WebSocket message.
enum ClientMessageResult {
    /// Message processed; continue the loop.
    Continue,
    /// A protocol-level error was sent to the client; continue the loop.
    ErrorSent,
    /// A WebSocket send failed; the connection is dead.
    Disconnected,
}

impl ClientMessageResult {
    fn from_error_send(sent: bool) -> Self {
        if sent { Self::ErrorSent } else { Self::Disconnected }
    }
}

/// The computed cache key a subscription reads from, if any.
fn subscription_to_cache_key(sub: &Subscription) -> Option<ComputedCacheKey> {
    match sub {
        Subscription::ScraperStats => Some(ComputedCacheKey::Stats),
        Subscription::ScraperTimeseries { filter } => Some(ComputedCacheKey::Timeseries {
            period: filter.period.clone(),
            bucket: filter
                .bucket
                .clone()
                .unwrap_or_else(|| default_bucket_for_period(&filter.period).to_string()),
        }),
        Subscription::ScraperSubjects { .. } => Some(ComputedCacheKey::Subjects),
        _ => None,
    }
}

/// WebSocket endpoint for real-time streams.
pub async fn stream_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_stream_ws(socket, state))
}

async fn send_message(sink: &mut Sink, message: &StreamServerMessage) -> bool {
    let Ok(json) = serde_json::to_string(message) else {
        return true;
    };
    sink.send(Message::Text(json.into())).await.is_ok()
}

async fn send_error(
    sink: &mut Sink,
    request_id: Option<String>,
    code: StreamErrorCode,
    message: &str,
) -> bool {
    let msg = StreamServerMessage::Error {
        request_id,
        code,
        message: message.to_string(),
    };
    send_message(sink, &msg).await
}

async fn handle_stream_ws(socket: WebSocket, state: AppState) {
    debug!("stream WebSocket connected");

    let (mut sink, mut stream) = socket.split();
    let ready = StreamServerMessage::Ready {
        protocol_version: STREAM_PROTOCOL_VERSION,
    };
    if !send_message(&mut sink, &ready).await {
        return;
    }

    let mut registry = SubscriptionRegistry::new();

    let (mut cursor, mut head_watch) = state.hub.subscribe_events();
    let mut computed_rx = state.hub.subscribe_computed();
    let mut idle_deadline = Instant::now() + IDLE_TIMEOUT;

    loop {
        tokio::select! {
            msg = stream.next() => {
                idle_deadline = Instant::now() + IDLE_TIMEOUT;
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if matches!(
                            handle_client_message(&mut sink, &state, &mut registry, &text).await,
                            ClientMessageResult::Disconnected
                        ) {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
            result = head_watch.changed() => {
                if result.is_err() {
                    break;
                }
                // Lag check: the cursor fell off the ring, so deltas were
                // lost; coalesce by resending snapshots.
                if cursor < state.hub.base_offset() {
                    if !resync_event_backed(&mut sink, &state, &mut registry).await {
                        break;
                    }
                    cursor = state.hub.base_offset();
                    continue;
                }
                let mut send_failed = false;
                while let Some(event) = state.hub.read_event(cursor) {
                    if !dispatch_event(&mut sink, &state, &mut registry, event).await {
                        send_failed = true;
                        break;
                    }
                    cursor += 1;
                }
                if send_failed {
                    break;
                }
            }
            update = computed_rx.recv() => {
                match update {
                    Ok(update) => {
                        if !dispatch_computed_update(&mut sink, &registry, update).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "computed updates lagged, resyncing");
                        if !resync_computed(&mut sink, &state, &mut registry).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = tokio::time::sleep_until(idle_deadline) => {
                debug!("closing idle stream connection");
                break;
            }
        }
    }

    // Drop computed-stream interest held by this connection.
    for (_, subscription) in registry.iter() {
        if let Some(key) = subscription_to_cache_key(subscription) {
            state.hub.deregister_computed(key);
        }
    }

    debug!("stream WebSocket disconnected");
}

async fn handle_client_message(
    sink: &mut Sink,
    state: &AppState,
    registry: &mut SubscriptionRegistry,
    text: &str,
) -> ClientMessageResult {
    let parsed = match serde_json::from_str::<StreamClientMessage>(text) {
        Ok(msg) => msg,
        Err(_) => {
            let sent =
                send_error(sink, None, StreamErrorCode::InvalidMessage, "Invalid message").await;
            return ClientMessageResult::from_error_send(sent);
        }
    };

    match parsed {
        StreamClientMessage::Subscribe {
            request_id,
            stream,
            filter,
        } => {
            let subscription = match build_subscription(stream, filter) {
                Ok(sub) => sub,
                Err(StreamError { code, message }) => {
                    let sent = send_error(sink, Some(request_id), code, &message).await;
                    return ClientMessageResult::from_error_send(sent);
                }
            };

            let sub_id = registry.allocate_id();
            if let Some(key) = subscription_to_cache_key(&subscription) {
                state.hub.register_computed(key);
            }
            registry.insert(sub_id.clone(), subscription);

            let subscribed = StreamServerMessage::Subscribed {
                request_id,
                subscription_id: sub_id.clone(),
                stream,
            };
            if !send_message(sink, &subscribed).await {
                return ClientMessageResult::Disconnected;
            }

            if !send_snapshot(sink, state, registry, &sub_id).await {
                return ClientMessageResult::Disconnected;
            }
        }
        StreamClientMessage::Modify {
            request_id,
            subscription_id,
            filter,
        } => {
            let Some(subscription) = registry.get(&subscription_id) else {
                let sent = send_error(
                    sink,
                    Some(request_id),
                    StreamErrorCode::UnknownSubscription,
                    "Unknown subscription",
                )
                .await;
                return ClientMessageResult::from_error_send(sent);
            };

            let stream = subscription.kind();
            let old_cache_key = subscription_to_cache_key(subscription);

            let updated = match build_subscription(stream, filter) {
                Ok(sub) => sub,
                Err(StreamError { code, message }) => {
                    let sent = send_error(sink, Some(request_id), code, &message).await;
                    return ClientMessageResult::from_error_send(sent);
                }
            };

            let new_cache_key = subscription_to_cache_key(&updated);
            if old_cache_key != new_cache_key {
                if let Some(key) = old_cache_key {
                    state.hub.deregister_computed(key);
                }
                if let Some(key) = new_cache_key {
                    state.hub.register_computed(key);
                }
            }

            *registry
                .get_mut(&subscription_id)
                .expect("subscription existed above") = updated;

            let modified = StreamServerMessage::Modified {
                request_id,
                subscription_id: subscription_id.clone(),
            };
            if !send_message(sink, &modified).await {
                return ClientMessageResult::Disconnected;
            }

            // A fresh snapshot under the new filter precedes any new delta.
            if !send_snapshot(sink, state, registry, &subscription_id).await {
                return ClientMessageResult::Disconnected;
            }
        }
        StreamClientMessage::Unsubscribe {
            request_id,
            subscription_id,
        } => {
            if let Some(sub) = registry.remove(&subscription_id)
                && let Some(key) = subscription_to_cache_key(&sub)
            {
                state.hub.deregister_computed(key);
            }
            let msg = StreamServerMessage::Unsubscribed {
                request_id,
                subscription_id,
            };
            if !send_message(sink, &msg).await {
                return ClientMessageResult::Disconnected;
            }
        }
        StreamClientMessage::Ping {
            request_id,
            timestamp,
        } => {
            let pong = StreamServerMessage::Pong {
                request_id,
                timestamp,
            };
            if !send_message(sink, &pong).await {
                return ClientMessageResult::Disconnected;
            }
        }
    }

    ClientMessageResult::Continue
}

/// Send the current snapshot for one subscription.
async fn send_snapshot(
    sink: &mut Sink,
    state: &AppState,
    registry: &mut SubscriptionRegistry,
    subscription_id: &str,
) -> bool {
    let Some(subscription) = registry.get_mut(subscription_id) else {
        return true;
    };

    let snapshot = match subscription {
        Subscription::ScrapeJobs { filter, known_ids } => {
            match scrape_jobs::build_snapshot(&state.db_pool, filter).await {
                Ok(jobs) => {
                    *known_ids = jobs.iter().map(|job| job.id).collect();
                    StreamSnapshot::ScrapeJobs { jobs }
                }
                Err(_) => {
                    return send_error(
                        sink,
                        None,
                        StreamErrorCode::InternalError,
                        "Failed to load scrape jobs snapshot",
                    )
                    .await;
                }
            }
        }
        Subscription::AuditLog { filter } => {
            match audit_log::build_snapshot(&state.db_pool, filter).await {
                Ok(entries) => StreamSnapshot::AuditLog { entries },
                Err(_) => {
                    return send_error(
                        sink,
                        None,
                        StreamErrorCode::InternalError,
                        "Failed to load audit log snapshot",
                    )
                    .await;
                }
            }
        }
        Subscription::ScraperStats => match compute_stats(&state.db_pool, STATS_PERIOD).await {
            Ok(stats) => StreamSnapshot::ScraperStats { stats },
            Err(_) => {
                return send_error(
                    sink,
                    None,
                    StreamErrorCode::InternalError,
                    "Failed to load stats",
                )
                .await;
            }
        },
        Subscription::ScraperTimeseries { filter } => {
            let bucket = filter
                .bucket
                .clone()
                .unwrap_or_else(|| default_bucket_for_period(&filter.period).to_string());
            match compute_timeseries(&state.db_pool, &filter.period, &bucket).await {
                Ok(points) => StreamSnapshot::ScraperTimeseries {
                    points,
                    period: filter.period.clone(),
                    bucket,
                },
                Err(_) => {
                    return send_error(
                        sink,
                        None,
                        StreamErrorCode::InternalError,
                        "Failed to load timeseries",
                    )
                    .await;
                }
            }
        }
        Subscription::ScraperSubjects { filter } => {
            match compute_subjects(&state.db_pool).await {
                Ok(subjects) => StreamSnapshot::ScraperSubjects {
                    subjects: filter_subjects(filter, subjects),
                },
                Err(_) => {
                    return send_error(
                        sink,
                        None,
                        StreamErrorCode::InternalError,
                        "Failed to load subjects",
                    )
                    .await;
                }
            }
        }
    };

    send_message(
        sink,
        &StreamServerMessage::Snapshot {
            subscription_id: subscription_id.to_string(),
            snapshot,
        },
    )
    .await
}

fn filter_subjects(
    filter: &ScraperSubjectsFilter,
    subjects: Vec<SubjectSummary>,
) -> Vec<SubjectSummary> {
    match &filter.subjects {
        Some(allowed) if !allowed.is_empty() => subjects
            .into_iter()
            .filter(|s| allowed.iter().any(|a| a == &s.subject))
            .collect(),
        _ => subjects,
    }
}

async fn dispatch_event(
    sink: &mut Sink,
    state: &AppState,
    registry: &mut SubscriptionRegistry,
    event: DomainEvent,
) -> bool {
    match event {
        DomainEvent::ScrapeJob(scrape_event) => {
            dispatch_scrape_job_event(sink, state, registry, scrape_event).await
        }
        DomainEvent::AuditLog(audit_event) => {
            dispatch_audit_log_event(sink, registry, audit_event).await
        }
    }
}

async fn dispatch_scrape_job_event(
    sink: &mut Sink,
    state: &AppState,
    registry: &mut SubscriptionRegistry,
    event: ScrapeJobEvent,
) -> bool {
    // One fetch of job details shared across every subscription on this
    // connection.
    let mut job_details = None;

    for (subscription_id, subscription) in registry.iter_mut() {
        let Subscription::ScrapeJobs { filter, known_ids } = subscription else {
            continue;
        };

        let matches = scrape_jobs::event_matches(
            &state.db_pool,
            filter,
            known_ids,
            &event,
            &mut job_details,
        )
        .await;

        if matches {
            let delta = StreamServerMessage::Delta {
                subscription_id: subscription_id.clone(),
                delta: StreamDelta::ScrapeJobs {
                    event: event.clone(),
                },
            };
            if !send_message(sink, &delta).await {
                return false;
            }
        }
    }

    true
}

async fn dispatch_audit_log_event(
    sink: &mut Sink,
    registry: &mut SubscriptionRegistry,
    event: AuditLogEvent,
) -> bool {
    for (subscription_id, subscription) in registry.iter_mut() {
        let Subscription::AuditLog { filter } = subscription else {
            continue;
        };

        let entries = audit_log::filter_entries(filter, &event.entries);
        if entries.is_empty() {
            continue;
        }

        let delta = StreamServerMessage::Delta {
            subscription_id: subscription_id.clone(),
            delta: StreamDelta::AuditLog { entries },
        };
        if !send_message(sink, &delta).await {
            return false;
        }
    }

    true
}

async fn dispatch_computed_update(
    sink: &mut Sink,
    registry: &SubscriptionRegistry,
    update: ComputedUpdate,
) -> bool {
    for (subscription_id, subscription) in registry.iter() {
        let matches = match (&update.key, subscription) {
            (ComputedCacheKey::Stats, Subscription::ScraperStats) => true,
            (
                ComputedCacheKey::Timeseries { period, bucket },
                Subscription::ScraperTimeseries { filter },
            ) => {
                let filter_bucket = filter
                    .bucket
                    .clone()
                    .unwrap_or_else(|| default_bucket_for_period(&filter.period).to_string());
                &filter.period == period && &filter_bucket == bucket
            }
            (ComputedCacheKey::Subjects, Subscription::ScraperSubjects { .. }) => true,
            _ => false,
        };

        if !matches {
            continue;
        }

        // Apply the subject-set filter to subject deltas per subscription.
        let delta = match (&update.delta, subscription) {
            (
                StreamDelta::ScraperSubjects { changed, removed },
                Subscription::ScraperSubjects { filter },
            ) => {
                let changed = filter_subjects(filter, changed.clone());
                let removed: Vec<_> = match &filter.subjects {
                    Some(allowed) if !allowed.is_empty() => removed
                        .iter()
                        .filter(|key| allowed.iter().any(|a| a == &key.subject))
                        .cloned()
                        .collect(),
                    _ => removed.clone(),
                };
                if changed.is_empty() && removed.is_empty() {
                    continue;
                }
                StreamDelta::ScraperSubjects { changed, removed }
            }
            _ => update.delta.clone(),
        };

        let msg = StreamServerMessage::Delta {
            subscription_id: subscription_id.clone(),
            delta,
        };
        if !send_message(sink, &msg).await {
            return false;
        }
    }
    true
}

/// Resend snapshots for the event-backed streams after ring lag.
async fn resync_event_backed(
    sink: &mut Sink,
    state: &AppState,
    registry: &mut SubscriptionRegistry,
) -> bool {
    for kind in [StreamKind::ScrapeJobs, StreamKind::AuditLog] {
        for subscription_id in registry.ids_for_kind(kind) {
            if !send_snapshot(sink, state, registry, &subscription_id).await {
                return false;
            }
        }
    }
    true
}

/// Resend snapshots for the computed streams after broadcast lag.
async fn resync_computed(
    sink: &mut Sink,
    state: &AppState,
    registry: &mut SubscriptionRegistry,
) -> bool {
    let ids: Vec<String> = registry
        .iter()
        .filter(|(_, sub)| sub.is_computed())
        .map(|(id, _)| id.clone())
        .collect();

    for subscription_id in ids {
        if !send_snapshot(sink, state, registry, &subscription_id).await {
            return false;
        }
    }
    true
}
