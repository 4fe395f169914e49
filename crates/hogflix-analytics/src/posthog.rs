//! PostHog sink.
//!
//! Calls on the [`Analytics`] trait build events on the caller's thread and
//! hand them to a bounded queue. A dedicated worker thread batches them to
//! `POST {host}/batch/` and refreshes feature flags from `POST {host}/decide/?v=3`
//! after every identify. Producers never block: a full queue drops the event.

use crate::{Analytics, Properties};
use chrono::{SecondsFormat, Utc};
use observability::redact::redact_object;
use parking_lot::{Mutex, RwLock};
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_QUEUE_CAPACITY: usize = 2_000;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 2_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const LIB_NAME: &str = "hogflix-rust";

/// Connection settings for the PostHog sink.
#[derive(Debug, Clone)]
pub struct PosthogConfig {
    pub api_key: String,
    pub host: String,
    pub batch_size: usize,
    pub queue_capacity: usize,
    pub flush_interval_ms: u64,
}

impl PosthogConfig {
    pub fn new(api_key: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            host: host.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
        }
    }

    fn base(&self) -> &str {
        self.host.trim_end_matches('/')
    }

    fn batch_endpoint(&self) -> String {
        format!("{}/batch/", self.base())
    }

    fn decide_endpoint(&self) -> String {
        format!("{}/decide/?v=3", self.base())
    }
}

#[derive(Clone, Debug, Serialize)]
struct PosthogEvent {
    event: String,
    distinct_id: String,
    properties: Properties,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct BatchPayload<'a> {
    api_key: &'a str,
    batch: Vec<PosthogEvent>,
    sent_at: String,
}

enum Command {
    Capture(PosthogEvent),
    ReloadFlags { distinct_id: String },
}

/// Who events are currently attributed to.
struct Identity {
    distinct_id: String,
    anonymous: bool,
    groups: Properties,
}

impl Identity {
    fn anonymous() -> Self {
        Self {
            distinct_id: Uuid::new_v4().to_string(),
            anonymous: true,
            groups: Properties::new(),
        }
    }
}

type FlagCache = Arc<RwLock<HashMap<String, Value>>>;

/// [`Analytics`] backed by PostHog's capture API.
pub struct PosthogAnalytics {
    sender: SyncSender<Command>,
    identity: Mutex<Identity>,
    flags: FlagCache,
}

impl PosthogAnalytics {
    /// Spawn the sink worker.
    pub fn start(config: PosthogConfig) -> std::io::Result<Self> {
        let (sender, receiver) = sync_channel(config.queue_capacity.max(100));
        let flags: FlagCache = Arc::new(RwLock::new(HashMap::new()));
        let worker_flags = Arc::clone(&flags);

        std::thread::Builder::new()
            .name("hogflix-analytics-sink".to_string())
            .spawn(move || run_sink_worker(receiver, config, worker_flags))?;

        Ok(Self {
            sender,
            identity: Mutex::new(Identity::anonymous()),
            flags,
        })
    }

    /// Current distinct id (anonymous uuid until identify).
    pub fn distinct_id(&self) -> String {
        self.identity.lock().distinct_id.clone()
    }

    fn enqueue(&self, command: Command) {
        match self.sender.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!("Analytics queue full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Analytics worker gone, dropping event");
            }
        }
    }

    fn capture(&self, event: &str, distinct_id: String, mut properties: Properties) {
        properties.insert("$lib".to_string(), Value::from(LIB_NAME));
        self.enqueue(Command::Capture(PosthogEvent {
            event: event.to_string(),
            distinct_id,
            properties: redact_object(&properties),
            timestamp: now_rfc3339(),
        }));
    }
}

impl Analytics for PosthogAnalytics {
    fn identify(&self, distinct_id: &str, properties: Properties) {
        let previous = {
            let mut identity = self.identity.lock();
            let previous = (identity.anonymous && identity.distinct_id != distinct_id)
                .then(|| identity.distinct_id.clone());
            identity.distinct_id = distinct_id.to_string();
            identity.anonymous = false;
            previous
        };

        let mut event_props = Properties::new();
        event_props.insert("$set".to_string(), Value::Object(properties));
        if let Some(anon) = previous {
            event_props.insert("$anon_distinct_id".to_string(), Value::String(anon));
        }
        self.capture("$identify", distinct_id.to_string(), event_props);
        self.enqueue(Command::ReloadFlags {
            distinct_id: distinct_id.to_string(),
        });
    }

    fn track_event(&self, event: &str, mut properties: Properties) {
        let (distinct_id, groups) = {
            let identity = self.identity.lock();
            (identity.distinct_id.clone(), identity.groups.clone())
        };
        if !groups.is_empty() {
            properties.insert("$groups".to_string(), Value::Object(groups));
        }
        self.capture(event, distinct_id, properties);
    }

    fn set_group(&self, group_type: &str, group_key: &str, properties: Properties) {
        let distinct_id = {
            let mut identity = self.identity.lock();
            identity
                .groups
                .insert(group_type.to_string(), Value::from(group_key));
            identity.distinct_id.clone()
        };

        let mut event_props = Properties::new();
        event_props.insert("$group_type".to_string(), Value::from(group_type));
        event_props.insert("$group_key".to_string(), Value::from(group_key));
        event_props.insert("$group_set".to_string(), Value::Object(properties));
        self.capture("$groupidentify", distinct_id, event_props);
    }

    fn set_person_properties(&self, properties: Properties) {
        let distinct_id = self.distinct_id();
        let mut event_props = Properties::new();
        event_props.insert("$set".to_string(), Value::Object(properties));
        self.capture("$set", distinct_id, event_props);
    }

    fn reset(&self) {
        *self.identity.lock() = Identity::anonymous();
        self.flags.write().clear();
    }

    fn is_feature_enabled(&self, flag: &str) -> bool {
        self.flags.read().get(flag).is_some_and(flag_is_on)
    }
}

/// Boolean flags are on when true; multivariate flags are on for any variant.
fn flag_is_on(value: &Value) -> bool {
    match value {
        Value::Bool(on) => *on,
        Value::String(variant) => !variant.is_empty(),
        _ => false,
    }
}

fn run_sink_worker(receiver: Receiver<Command>, config: PosthogConfig, flags: FlagCache) {
    let client = match Client::builder().timeout(REQUEST_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Failed to build analytics HTTP client, dropping all events");
            // Drain so producers never see a full queue.
            while receiver.recv().is_ok() {}
            return;
        }
    };

    let batch_size = config.batch_size.max(1);
    let flush_interval = Duration::from_millis(config.flush_interval_ms.max(100));
    let mut batch = Vec::new();

    loop {
        match receiver.recv_timeout(flush_interval) {
            Ok(Command::Capture(event)) => {
                batch.push(event);
                if batch.len() >= batch_size {
                    flush_batch(&mut batch, &config, &client);
                }
            }
            Ok(Command::ReloadFlags { distinct_id }) => {
                // The identify must reach PostHog before flags are evaluated for it.
                flush_batch(&mut batch, &config, &client);
                reload_flags(&distinct_id, &config, &client, &flags);
            }
            Err(RecvTimeoutError::Timeout) => {
                flush_batch(&mut batch, &config, &client);
            }
            Err(RecvTimeoutError::Disconnected) => {
                flush_batch(&mut batch, &config, &client);
                break;
            }
        }
    }
}

fn flush_batch(batch: &mut Vec<PosthogEvent>, config: &PosthogConfig, client: &Client) {
    if batch.is_empty() {
        return;
    }

    let payload = BatchPayload {
        api_key: &config.api_key,
        batch: std::mem::take(batch),
        sent_at: now_rfc3339(),
    };
    let count = payload.batch.len();

    match client.post(config.batch_endpoint()).json(&payload).send() {
        Ok(response) if response.status().is_success() => {
            debug!(count, "Flushed analytics batch");
        }
        Ok(response) => {
            warn!(status = %response.status(), count, "Analytics batch rejected");
        }
        Err(e) => {
            warn!(error = %e, count, "Analytics batch failed");
        }
    }
}

fn reload_flags(distinct_id: &str, config: &PosthogConfig, client: &Client, flags: &FlagCache) {
    let body = json!({ "api_key": config.api_key, "distinct_id": distinct_id });
    let response = match client.post(config.decide_endpoint()).json(&body).send() {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            warn!(status = %response.status(), "Feature flag request rejected");
            return;
        }
        Err(e) => {
            warn!(error = %e, "Feature flag request failed");
            return;
        }
    };

    match response.json::<Value>() {
        Ok(decoded) => {
            let loaded = parse_flags(&decoded);
            debug!(count = loaded.len(), "Loaded feature flags");
            *flags.write() = loaded;
        }
        Err(e) => warn!(error = %e, "Invalid feature flag response"),
    }
}

fn parse_flags(decoded: &Value) -> HashMap<String, Value> {
    decoded
        .get("featureFlags")
        .and_then(Value::as_object)
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
