//! Core domain model and provenance types for channel vacancy outreach.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "outreach-core";

/// Position used when no extractor could name the role.
pub const PLACEHOLDER_POSITION: &str = "Вакансия";

/// Numeric identity plus optional public username, as resolved by the channel source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

impl Identity {
    pub fn new(id: i64, username: Option<String>) -> Self {
        Self { id, username }
    }

    /// `@username` form, if the identity has a public username.
    pub fn handle(&self) -> Option<String> {
        self.username.as_deref().and_then(normalize_handle)
    }
}

/// One post observed on a monitored channel. Immutable once observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPost {
    pub channel: Identity,
    pub post_id: i64,
    pub raw_text: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub author_hint: Option<String>,
}

impl ChannelPost {
    pub fn lease_key(&self) -> LeaseKey {
        LeaseKey {
            channel_id: self.channel.id,
            post_id: self.post_id,
        }
    }
}

/// Key of a processing lease and of the persisted-record uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseKey {
    pub channel_id: i64,
    pub post_id: i64,
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel_id, self.post_id)
    }
}

/// Which extractor produced a field value. Drives the merge policy, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Heuristic,
    Ai,
    AuthorHint,
    Placeholder,
}

/// Extracted field wrapper with optional value + provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field<T> {
    pub value: Option<T>,
    pub source: Option<FieldSource>,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Field<T> {
    pub fn empty() -> Self {
        Self {
            value: None,
            source: None,
        }
    }

    pub fn with_source(value: T, source: FieldSource) -> Self {
        Self {
            value: Some(value),
            source: Some(source),
        }
    }

    pub fn maybe(value: Option<T>, source: FieldSource) -> Self {
        match value {
            Some(value) => Self::with_source(value, source),
            None => Self::empty(),
        }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Keep `self` when it carries a value, otherwise take `fallback`.
    pub fn or(self, fallback: Field<T>) -> Field<T> {
        if self.is_present() {
            self
        } else {
            fallback
        }
    }
}

impl Field<String> {
    /// Blank strings collapse to an empty field.
    pub fn text(value: Option<String>, source: FieldSource) -> Self {
        let value = value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        Self::maybe(value, source)
    }
}

impl Field<Vec<String>> {
    /// Empty lists collapse to an empty field.
    pub fn list(values: Vec<String>, source: FieldSource) -> Self {
        let values = values
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>();
        if values.is_empty() {
            Self::empty()
        } else {
            Self::with_source(values, source)
        }
    }

    pub fn items(&self) -> &[String] {
        self.value.as_deref().unwrap_or_default()
    }
}

/// Fields recovered from a post by the heuristic and AI extractors.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub position: Field<String>,
    pub company: Field<String>,
    pub salary: Field<String>,
    pub location: Field<String>,
    pub work_format: Field<String>,
    pub employment: Field<String>,
    pub contact: Field<String>,
    pub hashtags: Field<Vec<String>>,
    pub stack: Field<Vec<String>>,
    pub tasks: Field<Vec<String>>,
    pub summary: Field<String>,
}

impl ExtractionResult {
    /// Drop provenance, keeping only the persistable values.
    pub fn into_fields(self) -> VacancyFields {
        VacancyFields {
            position: self.position.value,
            company: self.company.value,
            salary: self.salary.value,
            location: self.location.value,
            work_format: self.work_format.value,
            employment: self.employment.value,
            contact: self.contact.value,
            hashtags: self.hashtags.value.unwrap_or_default(),
            stack: self.stack.value.unwrap_or_default(),
            tasks: self.tasks.value.unwrap_or_default(),
            summary: self.summary.value,
        }
    }
}

/// Persisted projection of an [`ExtractionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VacancyFields {
    pub position: Option<String>,
    pub company: Option<String>,
    pub salary: Option<String>,
    pub location: Option<String>,
    pub work_format: Option<String>,
    pub employment: Option<String>,
    pub contact: Option<String>,
    pub hashtags: Vec<String>,
    pub stack: Vec<String>,
    pub tasks: Vec<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VacancyStatus {
    Processed,
    Sent,
}

impl VacancyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VacancyStatus::Processed => "processed",
            VacancyStatus::Sent => "sent",
        }
    }
}

impl fmt::Display for VacancyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VacancyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processed" => Ok(VacancyStatus::Processed),
            "sent" => Ok(VacancyStatus::Sent),
            other => Err(format!("unknown vacancy status: {other}")),
        }
    }
}

/// Insert payload for a freshly extracted vacancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVacancy {
    pub channel_id: i64,
    pub channel_username: Option<String>,
    pub post_id: i64,
    pub full_text: String,
    pub fields: VacancyFields,
    pub published_at: DateTime<Utc>,
}

/// Canonical persisted vacancy. `(channel_id, post_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacancyRecord {
    pub id: Uuid,
    pub channel_id: i64,
    pub channel_username: Option<String>,
    pub post_id: i64,
    pub full_text: String,
    #[serde(flatten)]
    pub fields: VacancyFields,
    pub llm_reply: Option<String>,
    pub status: VacancyStatus,
    pub dm_sent: bool,
    pub processed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VacancyRecord {
    pub fn from_new(new: NewVacancy, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel_id: new.channel_id,
            channel_username: new.channel_username,
            post_id: new.post_id,
            full_text: new.full_text,
            fields: new.fields,
            llm_reply: None,
            status: VacancyStatus::Processed,
            dm_sent: false,
            processed_at: now,
            created_at: new.published_at,
            updated_at: now,
        }
    }

    pub fn key(&self) -> LeaseKey {
        LeaseKey {
            channel_id: self.channel_id,
            post_id: self.post_id,
        }
    }
}

/// Normalize `@name`, `name`, or a `t.me/name` link into `@name`.
///
/// Returns `None` for anything that is not a plausible public username
/// (5-32 chars of ASCII letters, digits or underscores, starting with a letter).
pub fn normalize_handle(input: &str) -> Option<String> {
    let mut s = input.trim();
    for prefix in ["https://", "http://"] {
        s = s.strip_prefix(prefix).unwrap_or(s);
    }
    for prefix in ["t.me/", "telegram.me/"] {
        s = s.strip_prefix(prefix).unwrap_or(s);
    }
    let s = s.trim_start_matches('@');
    let s = s.split(['/', '?', ' ']).next().unwrap_or_default();
    let valid_len = (5..=32).contains(&s.len());
    let starts_alpha = s.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    let valid_chars = s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_len && starts_alpha && valid_chars {
        Some(format!("@{s}"))
    } else {
        None
    }
}

/// Case-insensitive handle equality after normalization.
pub fn same_handle(a: &str, b: &str) -> bool {
    match (normalize_handle(a), normalize_handle(b)) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(&b),
        _ => false,
    }
}
