//! Catalogue of behavioral events the client emits.

use crate::Properties;
use serde_json::Value;

/// How a session came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMethod {
    Password,
    Demo,
    /// Session found on mount or by the background poll.
    Restored,
}

impl LoginMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginMethod::Password => "password",
            LoginMethod::Demo => "demo",
            LoginMethod::Restored => "restored",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    SignedUp {
        plan_id: String,
        demo: bool,
    },
    SignupRateLimited,
    LoggedIn {
        method: LoginMethod,
    },
    LoggedOut,
    DemoModeEntered {
        source: String,
    },
    PlanSelected {
        plan_id: String,
        price_cents: u32,
    },
    ProfileUpdated {
        fields: Vec<String>,
    },
    ImageUploaded {
        path: String,
        bytes: usize,
    },
    VideoPlayed {
        video_id: String,
        title: String,
    },
    PageViewed {
        path: String,
    },
}

impl AppEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AppEvent::SignedUp { .. } => "signed_up",
            AppEvent::SignupRateLimited => "signup_rate_limited",
            AppEvent::LoggedIn { .. } => "logged_in",
            AppEvent::LoggedOut => "logged_out",
            AppEvent::DemoModeEntered { .. } => "demo_mode_entered",
            AppEvent::PlanSelected { .. } => "plan_selected",
            AppEvent::ProfileUpdated { .. } => "profile_updated",
            AppEvent::ImageUploaded { .. } => "image_uploaded",
            AppEvent::VideoPlayed { .. } => "video_played",
            AppEvent::PageViewed { .. } => "$pageview",
        }
    }

    pub fn properties(&self) -> Properties {
        let mut props = Properties::new();
        let mut put = |key: &str, value: Value| {
            props.insert(key.to_string(), value);
        };

        match self {
            AppEvent::SignedUp { plan_id, demo } => {
                put("plan_id", Value::from(plan_id.as_str()));
                put("demo", Value::Bool(*demo));
            }
            AppEvent::LoggedIn { method } => put("method", Value::from(method.as_str())),
            AppEvent::DemoModeEntered { source } => put("source", Value::from(source.as_str())),
            AppEvent::PlanSelected {
                plan_id,
                price_cents,
            } => {
                put("plan_id", Value::from(plan_id.as_str()));
                put("price_cents", Value::from(*price_cents));
            }
            AppEvent::ProfileUpdated { fields } => put("fields", Value::from(fields.clone())),
            AppEvent::ImageUploaded { path, bytes } => {
                put("path", Value::from(path.as_str()));
                put("bytes", Value::from(*bytes));
            }
            AppEvent::VideoPlayed { video_id, title } => {
                put("video_id", Value::from(video_id.as_str()));
                put("title", Value::from(title.as_str()));
            }
            AppEvent::PageViewed { path } => put("$current_url", Value::from(path.as_str())),
            AppEvent::SignupRateLimited | AppEvent::LoggedOut => {}
        }

        props
    }
}
