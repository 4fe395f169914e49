//! Signup input validation and subscription plans.
//!
//! Everything here runs before any network call.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_DISPLAY_NAME_LEN: usize = 50;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please enter a valid email address")]
    InvalidEmail,

    #[error("Password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Please select a plan")]
    PlanNotSelected,

    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    #[error("Display name {0}")]
    InvalidDisplayName(String),

    #[error("Invalid language code: {0}")]
    InvalidLanguage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPlan {
    Basic,
    Standard,
    Premium,
}

impl SubscriptionPlan {
    pub const ALL: [SubscriptionPlan; 3] = [
        SubscriptionPlan::Basic,
        SubscriptionPlan::Standard,
        SubscriptionPlan::Premium,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            SubscriptionPlan::Basic => "basic",
            SubscriptionPlan::Standard => "standard",
            SubscriptionPlan::Premium => "premium",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SubscriptionPlan::Basic => "Basic",
            SubscriptionPlan::Standard => "Standard",
            SubscriptionPlan::Premium => "Premium",
        }
    }

    /// Monthly price in cents.
    pub fn price_cents(&self) -> u32 {
        match self {
            SubscriptionPlan::Basic => 899,
            SubscriptionPlan::Standard => 1_399,
            SubscriptionPlan::Premium => 1_999,
        }
    }
}

impl fmt::Display for SubscriptionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for SubscriptionPlan {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|plan| plan.id().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ValidationError::UnknownPlan(wanted.to_string()))
    }
}

/// Form input for account creation.
#[derive(Debug, Clone, Default)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub display_name: Option<String>,
    pub plan: Option<SubscriptionPlan>,
}

impl SignupRequest {
    /// Check the form. Returns the selected plan on success.
    pub fn validate(&self) -> Result<SubscriptionPlan, ValidationError> {
        validate_email(&self.email)?;
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::PasswordTooShort {
                min: MIN_PASSWORD_LEN,
            });
        }
        if self.password != self.confirm_password {
            return Err(ValidationError::PasswordMismatch);
        }
        if let Some(name) = &self.display_name {
            validate_display_name(name)?;
        }
        self.plan.ok_or(ValidationError::PlanNotSelected)
    }

    pub fn normalized_email(&self) -> String {
        self.email.trim().to_lowercase()
    }
}

/// A single `@` with a non-empty local part and a dotted domain.
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidEmail);
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(ValidationError::InvalidEmail);
    };
    let domain_ok = !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'));

    if local.is_empty() || !domain_ok {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(())
}

pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::InvalidDisplayName(
            "must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(ValidationError::InvalidDisplayName(format!(
            "must be at most {} characters",
            MAX_DISPLAY_NAME_LEN
        )));
    }
    Ok(())
}

/// Short language tags such as `en` or `pt-BR`.
pub fn validate_language(tag: &str) -> Result<(), ValidationError> {
    let len = tag.chars().count();
    let well_formed = (2..=5).contains(&len)
        && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && tag.chars().take(2).all(|c| c.is_ascii_alphabetic());
    if well_formed {
        Ok(())
    } else {
        Err(ValidationError::InvalidLanguage(tag.to_string()))
    }
}
