//! REST data feed: deadlines and events for the overlay

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed response from {endpoint}: {reason}")]
    Malformed { endpoint: String, reason: String },
}

/// Parse a feed timestamp. Offset-less values are local time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Local>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Local));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .ok()?;
    Local.from_local_datetime(&naive).earliest()
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Local>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn index_or_zero<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw.unwrap_or(0).max(0) as usize)
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

fn null_as_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(true))
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeadlineRecord {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    due_at: Option<DateTime<Local>>,
    #[serde(default, deserialize_with = "null_as_false")]
    completed: bool,
    #[serde(default, deserialize_with = "index_or_zero")]
    color_index: usize,
    #[serde(default, deserialize_with = "index_or_zero")]
    icon_index: usize,
    #[serde(default = "default_true", deserialize_with = "null_as_true")]
    widget_eligible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deadline {
    pub id: i64,
    pub title: String,
    pub due_at: Option<DateTime<Local>>,
    pub completed: bool,
    pub color_index: usize,
    pub icon_index: usize,
    pub widget_eligible: bool,
    /// The record as served, sent back on update
    pub raw: Value,
}

impl Deadline {
    pub fn from_json(value: Value) -> Option<Self> {
        let record: DeadlineRecord = match serde_json::from_value(value.clone()) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("Skipping malformed deadline record: {}", e);
                return None;
            }
        };
        Some(Self {
            id: record.id,
            title: record.title.unwrap_or_default(),
            due_at: record.due_at,
            completed: record.completed,
            color_index: record.color_index,
            icon_index: record.icon_index,
            widget_eligible: record.widget_eligible,
            raw: value,
        })
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub start_time: Option<DateTime<Local>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub end_time: Option<DateTime<Local>>,
}

impl Event {
    pub fn from_json(value: Value) -> Option<Self> {
        serde_json::from_value(value)
            .map_err(|e| log::warn!("Skipping malformed event record: {}", e))
            .ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    pub deadlines: Vec<Deadline>,
    pub events: Vec<Event>,
}

impl FeedSnapshot {
    /// Build a snapshot from the two collection bodies, skipping bad records
    pub fn from_values(deadlines: Value, events: Value) -> Result<Self, FeedError> {
        let deadlines = into_array("/deadlines", deadlines)?
            .into_iter()
            .filter_map(Deadline::from_json)
            .collect();
        let events = into_array("/events", events)?
            .into_iter()
            .filter_map(Event::from_json)
            .collect();
        Ok(Self { deadlines, events })
    }
}

fn into_array(endpoint: &str, value: Value) -> Result<Vec<Value>, FeedError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(FeedError::Malformed {
            endpoint: endpoint.to_string(),
            reason: format!("expected an array, got {}", kind_of(&other)),
        }),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Outcome of one poll, as delivered to the content layer
#[derive(Debug, Clone)]
pub enum FeedUpdate {
    Loaded(FeedSnapshot),
    Failed(String),
}

/// Something that can produce a feed snapshot
pub trait FeedSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<FeedSnapshot, FeedError>> + Send;
}

/// HTTP client for the backend REST API
#[derive(Clone)]
pub struct FeedClient {
    http: reqwest::Client,
    base_url: String,
}

impl FeedClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, path: &str) -> Result<Value, FeedError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FeedError::Status {
                endpoint: path.to_string(),
                status: response.status().as_u16(),
            });
        }

        response.json::<Value>().await.map_err(|e| FeedError::Malformed {
            endpoint: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Mark a deadline done by sending its record back with `completed: true`
    pub async fn complete_deadline(&self, deadline: &Deadline) -> Result<(), FeedError> {
        let mut body = deadline.raw.clone();
        if let Value::Object(map) = &mut body {
            map.insert("completed".to_string(), Value::Bool(true));
        }

        let path = format!("/deadlines/{}", deadline.id);
        let response = self
            .http
            .put(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FeedError::Status {
                endpoint: path,
                status: response.status().as_u16(),
            });
        }

        log::info!("Deadline {} marked as complete", deadline.id);
        Ok(())
    }
}

impl FeedSource for FeedClient {
    async fn fetch(&self) -> Result<FeedSnapshot, FeedError> {
        let (deadlines, events) =
            tokio::try_join!(self.get_json("/deadlines"), self.get_json("/events"))?;
        FeedSnapshot::from_values(deadlines, events)
    }
}

/// Poll interval and failure backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_backoff: Duration,
    pub request_timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl PollPolicy {
    /// Delay before the next poll given the current failure streak
    pub fn delay_after(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.interval;
        }
        let factor = 1u32 << (consecutive_failures - 1).min(16);
        self.interval
            .saturating_mul(factor)
            .min(self.max_backoff.max(self.interval))
    }
}

/// Poll `source` until the receiver goes away.
///
/// The first fetch happens immediately. Every fetch is bounded by the
/// request timeout so a hung backend cannot stall the schedule.
pub async fn run_poller<S: FeedSource>(
    source: Arc<S>,
    policy: PollPolicy,
    updates: mpsc::UnboundedSender<FeedUpdate>,
) {
    let mut failures: u32 = 0;

    loop {
        let update = match tokio::time::timeout(policy.request_timeout, source.fetch()).await {
            Ok(Ok(snapshot)) => {
                failures = 0;
                FeedUpdate::Loaded(snapshot)
            }
            Ok(Err(e)) => {
                failures = failures.saturating_add(1);
                log::warn!("Failed to fetch overlay data (attempt {}): {}", failures, e);
                FeedUpdate::Failed(e.to_string())
            }
            Err(_) => {
                failures = failures.saturating_add(1);
                let e = FeedError::Timeout(policy.request_timeout);
                log::warn!("Failed to fetch overlay data (attempt {}): {}", failures, e);
                FeedUpdate::Failed(e.to_string())
            }
        };

        if updates.send(update).is_err() {
            log::debug!("Feed receiver dropped, stopping poller");
            return;
        }

        tokio::time::sleep(policy.delay_after(failures)).await;
    }
}

/// Running poller; aborted when dropped
pub struct PollerHandle {
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn spawn<S: FeedSource>(
        source: Arc<S>,
        policy: PollPolicy,
        updates: mpsc::UnboundedSender<FeedUpdate>,
    ) -> Self {
        Self {
            task: tokio::spawn(run_poller(source, policy, updates)),
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use chrono::Timelike;
    use serde_json::json;

    use super::*;

    struct ScriptedSource {
        script: Mutex<VecDeque<Result<FeedSnapshot, String>>>,
        hang: bool,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<FeedSnapshot, String>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                hang: false,
            }
        }
    }

    impl FeedSource for ScriptedSource {
        async fn fetch(&self) -> Result<FeedSnapshot, FeedError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(snapshot)) => Ok(snapshot),
                Some(Err(reason)) => Err(FeedError::Malformed {
                    endpoint: "/deadlines".into(),
                    reason,
                }),
                None => Ok(empty()),
            }
        }
    }

    fn empty() -> FeedSnapshot {
        FeedSnapshot {
            deadlines: Vec::new(),
            events: Vec::new(),
        }
    }

    #[test]
    fn test_deadline_defaults() {
        let deadline = Deadline::from_json(json!({
            "id": 7,
            "title": "Essay",
            "dueAt": "2030-01-02T10:30:00",
            "colorIndex": null,
        }))
        .unwrap();

        assert_eq!(deadline.color_index, 0);
        assert_eq!(deadline.icon_index, 0);
        assert!(!deadline.completed);
        assert!(deadline.widget_eligible);
        assert_eq!(deadline.due_at.unwrap().hour(), 10);
        assert_eq!(deadline.raw["title"], "Essay");
    }

    #[test]
    fn test_bad_timestamp_is_tolerated() {
        let deadline = Deadline::from_json(json!({"id": 1, "dueAt": "soon"})).unwrap();
        assert!(deadline.due_at.is_none());
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let snapshot = FeedSnapshot::from_values(
            json!([{"id": 1, "title": "ok"}, {"title": "no id"}, 42]),
            json!([{"id": 3, "title": "Lecture", "startTime": "2030-01-02T09:00:00Z"}]),
        )
        .unwrap();
        assert_eq!(snapshot.deadlines.len(), 1);
        assert_eq!(snapshot.events.len(), 1);
        assert!(snapshot.events[0].start_time.is_some());
    }

    #[test]
    fn test_non_array_body_is_an_error() {
        let err = FeedSnapshot::from_values(json!({"error": "boom"}), json!([])).unwrap_err();
        assert!(matches!(err, FeedError::Malformed { .. }));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = PollPolicy {
            interval: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
            request_timeout: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_after(0), Duration::from_secs(30));
        assert_eq!(policy.delay_after(1), Duration::from_secs(30));
        assert_eq!(policy.delay_after(2), Duration::from_secs(60));
        assert_eq!(policy.delay_after(3), Duration::from_secs(120));
        assert_eq!(policy.delay_after(5), Duration::from_secs(300));
        assert_eq!(policy.delay_after(40), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_survives_failures() {
        let source = Arc::new(ScriptedSource::new(vec![
            Err("backend down".into()),
            Err("still down".into()),
            Ok(empty()),
        ]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _poller = PollerHandle::spawn(source, PollPolicy::default(), tx);

        assert!(matches!(rx.recv().await, Some(FeedUpdate::Failed(_))));
        assert!(matches!(rx.recv().await, Some(FeedUpdate::Failed(_))));
        assert!(matches!(rx.recv().await, Some(FeedUpdate::Loaded(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_fetch_times_out() {
        let source = Arc::new(ScriptedSource {
            script: Mutex::new(VecDeque::new()),
            hang: true,
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _poller = PollerHandle::spawn(source, PollPolicy::default(), tx);

        match rx.recv().await {
            Some(FeedUpdate::Failed(reason)) => assert!(reason.contains("timed out")),
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_polling() {
        let source = Arc::new(ScriptedSource::new(Vec::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let poller = PollerHandle::spawn(source, PollPolicy::default(), tx);

        assert!(matches!(rx.recv().await, Some(FeedUpdate::Loaded(_))));
        drop(poller);
        assert!(rx.recv().await.is_none());
    }
}
