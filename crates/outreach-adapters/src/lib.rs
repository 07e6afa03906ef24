//! Channel source contracts, the fixture-backed loopback source, the
//! text-understanding client and the heuristic field extractor.

pub mod heuristics;
pub mod text_service;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outreach_core::{normalize_handle, same_handle, ChannelPost, Identity};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

pub use heuristics::HeuristicExtractor;
pub use text_service::{
    GenerationParams, HttpTextService, TextService, TextServiceConfig, TextServiceError,
    TransportProfile,
};

pub const CRATE_NAME: &str = "outreach-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("identity not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Capability boundary of the channel-event source: live push, on-demand
/// history, identity resolution and direct messages.
#[async_trait]
pub trait ChannelSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// Live posts. The receiver closes when the source stops delivering.
    async fn subscribe(&self) -> Result<mpsc::Receiver<ChannelPost>, AdapterError>;

    /// Historical posts of `channel`, newest first, at most `limit`, none older than `since`.
    async fn iterate_posts(
        &self,
        channel: &Identity,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChannelPost>, AdapterError>;

    async fn resolve_identity(&self, reference: &str) -> Result<Identity, AdapterError>;

    async fn send_text(&self, target: &Identity, text: &str) -> Result<(), AdapterError>;

    async fn send_file(
        &self,
        target: &Identity,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<(), AdapterError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelFixture {
    pub fixture_id: String,
    #[serde(default)]
    pub channels: Vec<FixtureChannel>,
    #[serde(default)]
    pub users: Vec<Identity>,
    #[serde(default)]
    pub live: Vec<FixtureLivePost>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureChannel {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub posts: Vec<FixturePost>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixturePost {
    pub post_id: i64,
    pub text: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureLivePost {
    pub channel: String,
    #[serde(flatten)]
    pub post: FixturePost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundBody {
    Text(String),
    File {
        path: PathBuf,
        caption: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub target: Identity,
    pub body: OutboundBody,
}

pub fn load_channel_fixture(path: impl AsRef<Path>) -> Result<ChannelFixture> {
    read_json_file(path)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn fixture_post_to_core(channel: &FixtureChannel, post: &FixturePost) -> ChannelPost {
    ChannelPost {
        channel: Identity::new(channel.id, Some(channel.username.clone())),
        post_id: post.post_id,
        raw_text: post.text.clone(),
        published_at: post.published_at,
        author_hint: post.author.clone(),
    }
}

/// Loopback source replaying a fixture bundle. Outbound messages are recorded
/// and logged instead of transmitted.
#[derive(Debug)]
pub struct FixtureChannelSource {
    fixture: ChannelFixture,
    outbox: Mutex<Vec<OutboundMessage>>,
}

impl FixtureChannelSource {
    pub fn new(fixture: ChannelFixture) -> Self {
        Self {
            fixture,
            outbox: Mutex::new(Vec::new()),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_channel_fixture(path)?))
    }

    pub fn fixture(&self) -> &ChannelFixture {
        &self.fixture
    }

    pub async fn outbox(&self) -> Vec<OutboundMessage> {
        self.outbox.lock().await.clone()
    }

    fn channel_by_ref(&self, reference: &str) -> Option<&FixtureChannel> {
        self.fixture
            .channels
            .iter()
            .find(|c| same_handle(&c.username, reference) || c.id.to_string() == reference.trim())
    }

    fn live_posts(&self) -> Vec<ChannelPost> {
        self.fixture
            .live
            .iter()
            .filter_map(|live| {
                let channel = self.channel_by_ref(&live.channel)?;
                Some(fixture_post_to_core(channel, &live.post))
            })
            .collect()
    }
}

#[async_trait]
impl ChannelSource for FixtureChannelSource {
    fn source_id(&self) -> &'static str {
        "fixture"
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<ChannelPost>, AdapterError> {
        let posts = self.live_posts();
        let (tx, rx) = mpsc::channel(posts.len().max(1));
        tokio::spawn(async move {
            for post in posts {
                if tx.send(post).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn iterate_posts(
        &self,
        channel: &Identity,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChannelPost>, AdapterError> {
        let Some(fixture_channel) = self.fixture.channels.iter().find(|c| c.id == channel.id) else {
            return Err(AdapterError::NotFound(channel.id.to_string()));
        };
        let mut posts = fixture_channel
            .posts
            .iter()
            .filter(|p| since.map_or(true, |since| p.published_at >= since))
            .map(|p| fixture_post_to_core(fixture_channel, p))
            .collect::<Vec<_>>();
        posts.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        posts.truncate(limit);
        Ok(posts)
    }

    async fn resolve_identity(&self, reference: &str) -> Result<Identity, AdapterError> {
        if let Some(channel) = self.channel_by_ref(reference) {
            return Ok(Identity::new(channel.id, Some(channel.username.clone())));
        }
        let wanted = normalize_handle(reference);
        self.fixture
            .users
            .iter()
            .find(|u| match (&wanted, u.handle()) {
                (Some(wanted), Some(handle)) => wanted.eq_ignore_ascii_case(&handle),
                _ => u.id.to_string() == reference.trim(),
            })
            .cloned()
            .ok_or_else(|| AdapterError::NotFound(reference.to_string()))
    }

    async fn send_text(&self, target: &Identity, text: &str) -> Result<(), AdapterError> {
        info!(target_id = target.id, username = ?target.username, chars = text.chars().count(), "loopback send");
        self.outbox.lock().await.push(OutboundMessage {
            target: target.clone(),
            body: OutboundBody::Text(text.to_string()),
        });
        Ok(())
    }

    async fn send_file(
        &self,
        target: &Identity,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<(), AdapterError> {
        if !path.exists() {
            return Err(AdapterError::Message(format!(
                "attachment {} does not exist",
                path.display()
            )));
        }
        debug!(target_id = target.id, path = %path.display(), "loopback send file");
        self.outbox.lock().await.push(OutboundMessage {
            target: target.clone(),
            body: OutboundBody::File {
                path: path.to_path_buf(),
                caption: caption.map(ToString::to_string),
            },
        });
        Ok(())
    }
}
