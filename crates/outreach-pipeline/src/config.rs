//! Immutable runtime settings: built-in defaults, then an optional YAML file,
//! then environment variables.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use outreach_adapters::{GenerationParams, TextServiceConfig, TransportProfile};
use outreach_core::normalize_handle;
use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "outreach.yaml";
pub const DEFAULT_FIXTURE_PATH: &str = "fixtures/channels/sample.json";
const DEFAULT_LEASE_TTL_DAYS: u64 = 7;
/// Upper bound for the lease TTL; larger values are rejected at startup.
const MAX_LEASE_TTL_DAYS: u64 = 3650;
const SECS_PER_DAY: u64 = 24 * 60 * 60;

const OUR_CRATES: &[&str] = &[
    "outreach_core",
    "outreach_storage",
    "outreach_adapters",
    "outreach_pipeline",
    "outreach_web",
    "outreach_cli",
];

/// One text-understanding role (field extraction or reply generation).
#[derive(Debug, Clone)]
pub struct AiRole {
    pub service: TextServiceConfig,
    pub params: GenerationParams,
}

#[derive(Debug, Clone)]
pub struct BackfillSettings {
    pub enabled: bool,
    pub limit: usize,
    pub since_days: Option<i64>,
    pub delay: Duration,
}

impl BackfillSettings {
    fn window_fits(days: i64, now: DateTime<Utc>) -> bool {
        days <= 0
            || TimeDelta::try_days(days)
                .and_then(|window| now.checked_sub_signed(window))
                .is_some()
    }

    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.since_days
            .filter(|days| *days > 0)
            .and_then(TimeDelta::try_days)
            .and_then(|window| now.checked_sub_signed(window))
    }
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub path: PathBuf,
    pub caption: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub channels: Vec<String>,
    pub keywords: Vec<String>,
    pub excluded_handles: Vec<String>,
    pub reply_template: Option<String>,
    pub max_targets: usize,
    pub message_delay: Duration,
    pub dry_run: bool,
    pub replies_enabled: bool,
    pub backfill: BackfillSettings,
    pub debug: bool,
    pub verbose: bool,
    pub candidate_profile: Option<String>,
    pub attachment: Option<Attachment>,
    pub ai_extract: Option<AiRole>,
    pub ai_reply: Option<AiRole>,
    pub database_url: Option<String>,
    pub fixture_path: PathBuf,
    pub web_port: u16,
    pub lease_ttl: Duration,
    /// Startup problems that disabled a subsystem. Logged once via [`Settings::log_notices`].
    pub notices: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        RawSettings::default().resolve(Vec::new())
    }
}

impl Settings {
    /// Reads `OUTREACH_CONFIG` (or `outreach.yaml` when present) and the process environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var("OUTREACH_CONFIG").ok().map(PathBuf::from);
        Self::load_with(path.as_deref(), &|name| std::env::var(name).ok())
    }

    pub fn load_with(path: Option<&Path>, env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let yaml = match path {
            Some(path) => Some(
                fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?,
            ),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Some(
                        fs::read_to_string(default)
                            .with_context(|| format!("reading config {}", default.display()))?,
                    )
                } else {
                    None
                }
            }
        };
        Self::from_sources(yaml.as_deref(), env)
    }

    pub fn from_sources(yaml: Option<&str>, env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let mut raw: RawSettings = match yaml {
            Some(text) if !text.trim().is_empty() => {
                serde_yaml::from_str(text).context("parsing YAML configuration")?
            }
            _ => RawSettings::default(),
        };
        let mut notices = Vec::new();
        raw.overlay_env(&mut EnvReader {
            lookup: env,
            notices: &mut notices,
        });
        Ok(raw.resolve(notices))
    }

    pub fn log_notices(&self) {
        for notice in &self.notices {
            warn!("{notice}");
        }
    }

    /// Configured exclusions plus the monitored channels themselves, as `@handles`.
    pub fn contact_exclusions(&self) -> Vec<String> {
        let mut handles: Vec<String> = Vec::new();
        for handle in self
            .excluded_handles
            .iter()
            .chain(self.channels.iter())
            .filter_map(|h| normalize_handle(h))
        {
            if !handles.iter().any(|h| h.eq_ignore_ascii_case(&handle)) {
                handles.push(handle);
            }
        }
        handles
    }

    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub fn log_directive(&self) -> String {
        let base = if self.debug { "debug" } else { "info" };
        if !self.verbose {
            return base.to_string();
        }
        std::iter::once(base.to_string())
            .chain(OUR_CRATES.iter().map(|krate| format!("{krate}=trace")))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn ai_enabled(&self) -> bool {
        self.ai_extract.is_some() || self.ai_reply.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    channels: Option<Vec<String>>,
    keywords: Option<Vec<String>>,
    excluded_handles: Option<Vec<String>>,
    reply_template: Option<String>,
    max_targets: Option<usize>,
    message_delay_secs: Option<u64>,
    dry_run: Option<bool>,
    replies_enabled: Option<bool>,
    backfill_enabled: Option<bool>,
    backfill_limit: Option<usize>,
    backfill_since_days: Option<i64>,
    backfill_delay_ms: Option<u64>,
    debug: Option<bool>,
    verbose: Option<bool>,
    candidate_profile: Option<String>,
    attachment_path: Option<PathBuf>,
    attachment_caption: Option<String>,
    ai_enabled: Option<bool>,
    ai_profile: Option<TransportProfile>,
    ai_endpoint: Option<String>,
    ai_api_key: Option<String>,
    ai_model: Option<String>,
    ai_timeout_secs: Option<u64>,
    ai_extract_endpoint: Option<String>,
    ai_extract_model: Option<String>,
    ai_extract_temperature: Option<f32>,
    ai_extract_max_tokens: Option<u32>,
    ai_reply_endpoint: Option<String>,
    ai_reply_model: Option<String>,
    ai_reply_temperature: Option<f32>,
    ai_reply_max_tokens: Option<u32>,
    database_url: Option<String>,
    fixture_path: Option<PathBuf>,
    web_port: Option<u16>,
    lease_ttl_days: Option<u64>,
}

struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
    notices: &'a mut Vec<String>,
}

impl EnvReader<'_> {
    fn text(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn list(&self, name: &str) -> Option<Vec<String>> {
        self.text(name).map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect()
        })
    }

    fn parse<T>(&mut self, name: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let value = self.text(name)?;
        match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                self.notices
                    .push(format!("ignoring {name}={value}: {err}"));
                None
            }
        }
    }

    fn flag(&mut self, name: &str) -> Option<bool> {
        let value = self.text(name)?;
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                self.notices
                    .push(format!("ignoring {name}={value}: expected a boolean"));
                None
            }
        }
    }
}

fn set<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

impl RawSettings {
    fn overlay_env(&mut self, env: &mut EnvReader<'_>) {
        set(&mut self.channels, env.list("OUTREACH_CHANNELS"));
        set(&mut self.keywords, env.list("OUTREACH_KEYWORDS"));
        set(&mut self.excluded_handles, env.list("OUTREACH_EXCLUDED_HANDLES"));
        set(&mut self.reply_template, env.text("OUTREACH_REPLY_TEMPLATE"));
        set(&mut self.max_targets, env.parse("OUTREACH_MAX_TARGETS"));
        set(&mut self.message_delay_secs, env.parse("OUTREACH_MESSAGE_DELAY_SECS"));
        set(&mut self.dry_run, env.flag("OUTREACH_DRY_RUN"));
        set(&mut self.replies_enabled, env.flag("OUTREACH_REPLIES_ENABLED"));
        set(&mut self.backfill_enabled, env.flag("OUTREACH_BACKFILL_ENABLED"));
        set(&mut self.backfill_limit, env.parse("OUTREACH_BACKFILL_LIMIT"));
        set(&mut self.backfill_since_days, env.parse("OUTREACH_BACKFILL_SINCE_DAYS"));
        set(&mut self.backfill_delay_ms, env.parse("OUTREACH_BACKFILL_DELAY_MS"));
        set(&mut self.debug, env.flag("OUTREACH_DEBUG"));
        set(&mut self.verbose, env.flag("OUTREACH_VERBOSE"));
        set(&mut self.candidate_profile, env.text("OUTREACH_CANDIDATE_PROFILE"));
        set(&mut self.attachment_path, env.text("OUTREACH_ATTACHMENT_PATH").map(PathBuf::from));
        set(&mut self.attachment_caption, env.text("OUTREACH_ATTACHMENT_CAPTION"));
        set(&mut self.ai_enabled, env.flag("AI_ENABLED"));
        set(&mut self.ai_profile, env.parse("AI_PROFILE"));
        set(&mut self.ai_endpoint, env.text("AI_ENDPOINT"));
        set(&mut self.ai_api_key, env.text("AI_API_KEY"));
        set(&mut self.ai_model, env.text("AI_MODEL"));
        set(&mut self.ai_timeout_secs, env.parse("AI_TIMEOUT_SECS"));
        set(&mut self.ai_extract_endpoint, env.text("AI_EXTRACT_ENDPOINT"));
        set(&mut self.ai_extract_model, env.text("AI_EXTRACT_MODEL"));
        set(&mut self.ai_extract_temperature, env.parse("AI_EXTRACT_TEMPERATURE"));
        set(&mut self.ai_extract_max_tokens, env.parse("AI_EXTRACT_MAX_TOKENS"));
        set(&mut self.ai_reply_endpoint, env.text("AI_REPLY_ENDPOINT"));
        set(&mut self.ai_reply_model, env.text("AI_REPLY_MODEL"));
        set(&mut self.ai_reply_temperature, env.parse("AI_REPLY_TEMPERATURE"));
        set(&mut self.ai_reply_max_tokens, env.parse("AI_REPLY_MAX_TOKENS"));
        set(&mut self.database_url, env.text("DATABASE_URL"));
        set(&mut self.fixture_path, env.text("OUTREACH_FIXTURE_PATH").map(PathBuf::from));
        set(&mut self.web_port, env.parse("OUTREACH_WEB_PORT"));
        set(&mut self.lease_ttl_days, env.parse("OUTREACH_LEASE_TTL_DAYS"));
    }

    fn ai_role(
        &self,
        endpoint: Option<&String>,
        model: Option<&String>,
        params: GenerationParams,
    ) -> Option<AiRole> {
        let endpoint = endpoint.or(self.ai_endpoint.as_ref())?;
        let model = model.or(self.ai_model.as_ref())?;
        Some(AiRole {
            service: TextServiceConfig {
                profile: self.ai_profile.unwrap_or_default(),
                endpoint: endpoint.clone(),
                model: model.clone(),
                api_key: self.ai_api_key.clone(),
                timeout: Duration::from_secs(self.ai_timeout_secs.unwrap_or(30).max(1)),
                system_prompt: None,
            },
            params,
        })
    }

    fn resolve(self, mut notices: Vec<String>) -> Settings {
        let (ai_extract, ai_reply) = if self.ai_enabled.unwrap_or(false) {
            let extract = self.ai_role(
                self.ai_extract_endpoint.as_ref(),
                self.ai_extract_model.as_ref(),
                GenerationParams {
                    temperature: self.ai_extract_temperature.unwrap_or(0.0),
                    max_tokens: self.ai_extract_max_tokens.unwrap_or(800),
                },
            );
            let reply = self.ai_role(
                self.ai_reply_endpoint.as_ref(),
                self.ai_reply_model.as_ref(),
                GenerationParams {
                    temperature: self.ai_reply_temperature.unwrap_or(0.7),
                    max_tokens: self.ai_reply_max_tokens.unwrap_or(300),
                },
            );
            let missing = [("extraction", extract.is_none()), ("reply", reply.is_none())]
                .into_iter()
                .filter_map(|(role, missing)| missing.then_some(role))
                .collect::<Vec<_>>();
            if !missing.is_empty() {
                notices.push(format!(
                    "AI is enabled but no endpoint/model is configured for {}; those roles are disabled",
                    missing.join(" and ")
                ));
            }
            (extract, reply)
        } else {
            (None, None)
        };

        let since_days = match self.backfill_since_days {
            Some(days) if BackfillSettings::window_fits(days, Utc::now()) => Some(days),
            Some(days) => {
                notices.push(format!(
                    "backfill window of {days} days is out of range; sweeping without a time bound"
                ));
                None
            }
            None => None,
        };

        let lease_ttl = match self.lease_ttl_days {
            Some(days) if days <= MAX_LEASE_TTL_DAYS => days,
            Some(days) => {
                notices.push(format!(
                    "lease TTL of {days} days exceeds {MAX_LEASE_TTL_DAYS}; using {DEFAULT_LEASE_TTL_DAYS}"
                ));
                DEFAULT_LEASE_TTL_DAYS
            }
            None => DEFAULT_LEASE_TTL_DAYS,
        };

        if self.database_url.is_none() {
            notices.push(
                "DATABASE_URL is not set; leases and vacancies are kept in memory".to_string(),
            );
        }

        let attachment = match self.attachment_path {
            Some(path) if path.is_file() => Some(Attachment {
                path,
                caption: self.attachment_caption,
            }),
            Some(path) => {
                notices.push(format!(
                    "attachment {} is not a readable file; attachments are disabled",
                    path.display()
                ));
                None
            }
            None => None,
        };

        Settings {
            channels: self.channels.unwrap_or_default(),
            keywords: self.keywords.unwrap_or_default(),
            excluded_handles: self.excluded_handles.unwrap_or_default(),
            reply_template: self.reply_template.filter(|t| !t.trim().is_empty()),
            max_targets: self.max_targets.unwrap_or(3),
            message_delay: Duration::from_secs(self.message_delay_secs.unwrap_or(20)),
            dry_run: self.dry_run.unwrap_or(true),
            replies_enabled: self.replies_enabled.unwrap_or(false),
            backfill: BackfillSettings {
                enabled: self.backfill_enabled.unwrap_or(true),
                limit: self.backfill_limit.unwrap_or(50),
                since_days,
                delay: Duration::from_millis(self.backfill_delay_ms.unwrap_or(1500)),
            },
            debug: self.debug.unwrap_or(false),
            verbose: self.verbose.unwrap_or(false),
            candidate_profile: self.candidate_profile.filter(|p| !p.trim().is_empty()),
            attachment,
            ai_extract,
            ai_reply,
            database_url: self.database_url,
            fixture_path: self
                .fixture_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FIXTURE_PATH)),
            web_port: self.web_port.unwrap_or(8000),
            lease_ttl: Duration::from_secs(lease_ttl * SECS_PER_DAY),
            notices,
        }
    }
}
