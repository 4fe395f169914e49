//! Profile record, its table row form, and partial updates.

use hogflix_auth::{validate_display_name, validate_language, AuthUser, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_LANGUAGE: &str = "en";

/// A user's profile as the UI sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
    pub language: String,
    pub is_kids_account: bool,
}

impl ProfileRecord {
    /// The default profile for a user with no row yet.
    ///
    /// Every code path that needs a default profile goes through here.
    pub fn default_for(user: &AuthUser) -> Self {
        Self {
            id: user.id.clone(),
            display_name: user.fallback_display_name(),
            avatar_url: user.metadata_str("avatar_url").map(str::to_string),
            email: user.email.clone(),
            language: user
                .metadata_str("language")
                .filter(|tag| validate_language(tag).is_ok())
                .unwrap_or(DEFAULT_LANGUAGE)
                .to_string(),
            is_kids_account: false,
        }
    }

    /// Build a record from a row, filling gaps from the auth user.
    pub fn from_row(row: ProfileRow, user: &AuthUser) -> Self {
        let defaults = Self::default_for(user);
        Self {
            id: row.id,
            display_name: row
                .name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .unwrap_or(defaults.display_name),
            avatar_url: row.avatar_url.or(defaults.avatar_url),
            email: row.email.or(defaults.email),
            language: row.language.unwrap_or(defaults.language),
            is_kids_account: row.is_kids.unwrap_or(false),
        }
    }

    pub fn to_row(&self) -> ProfileRow {
        ProfileRow {
            id: self.id.clone(),
            name: Some(self.display_name.clone()),
            avatar_url: self.avatar_url.clone(),
            language: Some(self.language.clone()),
            is_kids: Some(self.is_kids_account),
            email: self.email.clone(),
        }
    }

    /// Apply an update locally (demo sessions, optimistic UI).
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(name) = &update.display_name {
            self.display_name = name.trim().to_string();
        }
        if let Some(avatar_url) = &update.avatar_url {
            self.avatar_url = Some(avatar_url.clone());
        }
        if let Some(language) = &update.language {
            self.language = language.clone();
        }
        if let Some(is_kids) = update.is_kids_account {
            self.is_kids_account = is_kids;
        }
    }
}

/// Row of the `profiles` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub is_kids: Option<bool>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Fields changed from the profile management screen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub language: Option<String>,
    pub is_kids_account: Option<bool>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.display_name {
            validate_display_name(name)?;
        }
        if let Some(language) = &self.language {
            validate_language(language)?;
        }
        Ok(())
    }

    /// Names of the fields this update touches.
    pub fn changed_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        if self.display_name.is_some() {
            fields.push("display_name".to_string());
        }
        if self.avatar_url.is_some() {
            fields.push("avatar_url".to_string());
        }
        if self.language.is_some() {
            fields.push("language".to_string());
        }
        if self.is_kids_account.is_some() {
            fields.push("is_kids_account".to_string());
        }
        fields
    }

    /// PATCH body in table column names.
    pub fn to_patch(&self) -> Map<String, Value> {
        let mut patch = Map::new();
        if let Some(name) = &self.display_name {
            patch.insert("name".to_string(), Value::from(name.trim()));
        }
        if let Some(avatar_url) = &self.avatar_url {
            patch.insert("avatar_url".to_string(), Value::from(avatar_url.as_str()));
        }
        if let Some(language) = &self.language {
            patch.insert("language".to_string(), Value::from(language.as_str()));
        }
        if let Some(is_kids) = self.is_kids_account {
            patch.insert("is_kids".to_string(), Value::Bool(is_kids));
        }
        patch
    }
}
