//! In-memory [`Analytics`] that records every call, for tests.

use crate::{Analytics, Properties};
use parking_lot::Mutex;
use std::collections::HashSet;

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyticsCall {
    Identify {
        distinct_id: String,
        properties: Properties,
    },
    Track {
        event: String,
        properties: Properties,
    },
    Group {
        group_type: String,
        group_key: String,
        properties: Properties,
    },
    SetPersonProperties(Properties),
    Reset,
}

#[derive(Debug, Default)]
pub struct RecordingAnalytics {
    calls: Mutex<Vec<AnalyticsCall>>,
    enabled_flags: Mutex<HashSet<String>>,
}

impl RecordingAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<AnalyticsCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn enable_flag(&self, flag: &str) {
        self.enabled_flags.lock().insert(flag.to_string());
    }

    /// Distinct ids passed to `identify`, in order.
    pub fn identified_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                AnalyticsCall::Identify { distinct_id, .. } => Some(distinct_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Event names passed to `track_event`, in order.
    pub fn tracked_events(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                AnalyticsCall::Track { event, .. } => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn reset_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, AnalyticsCall::Reset))
            .count()
    }

    fn push(&self, call: AnalyticsCall) {
        self.calls.lock().push(call);
    }
}

impl Analytics for RecordingAnalytics {
    fn identify(&self, distinct_id: &str, properties: Properties) {
        self.push(AnalyticsCall::Identify {
            distinct_id: distinct_id.to_string(),
            properties,
        });
    }

    fn track_event(&self, event: &str, properties: Properties) {
        self.push(AnalyticsCall::Track {
            event: event.to_string(),
            properties,
        });
    }

    fn set_group(&self, group_type: &str, group_key: &str, properties: Properties) {
        self.push(AnalyticsCall::Group {
            group_type: group_type.to_string(),
            group_key: group_key.to_string(),
            properties,
        });
    }

    fn set_person_properties(&self, properties: Properties) {
        self.push(AnalyticsCall::SetPersonProperties(properties));
    }

    fn reset(&self) {
        self.push(AnalyticsCall::Reset);
    }

    fn is_feature_enabled(&self, flag: &str) -> bool {
        self.enabled_flags.lock().contains(flag)
    }
}
