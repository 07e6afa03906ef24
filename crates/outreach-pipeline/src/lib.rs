//! Post-processing pipeline: admission, relevance, extraction, persistence and
//! outreach, fed by the live subscription and the backfill sweep.

pub mod ai_extract;
pub mod backfill;
pub mod config;
pub mod dispatch;
pub mod gate;
pub mod identity;
pub mod merge;
pub mod relevance;
pub mod reply;
pub mod stats;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use outreach_adapters::{ChannelSource, HeuristicExtractor, HttpTextService, TextService};
use outreach_core::{ChannelPost, ExtractionResult, NewVacancy};
use outreach_storage::{LeaseStore, StoreError, VacancyStore};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use ai_extract::AiFieldExtractor;
pub use backfill::{run_backfill, BackfillSummary};
pub use config::Settings;
pub use dispatch::{DispatchReport, DispatchSettings, OutreachDispatcher, TargetOutcome};
pub use gate::IdempotencyGate;
pub use identity::IdentityCache;
pub use merge::merge_fields;
pub use relevance::RelevanceFilter;
pub use reply::{ReplyContext, ReplySynthesizer};
pub use stats::{PipelineStats, StatsSnapshot};

use stats::Counter;

pub const CRATE_NAME: &str = "outreach-pipeline";

/// External collaborators the pipeline is wired to.
pub struct Components {
    pub source: Arc<dyn ChannelSource>,
    pub leases: Arc<dyn LeaseStore>,
    pub vacancies: Arc<dyn VacancyStore>,
    pub extract_service: Option<Arc<dyn TextService>>,
    pub reply_service: Option<Arc<dyn TextService>>,
}

/// HTTP text services for the AI roles that survived configuration.
pub fn text_services(
    settings: &Settings,
) -> Result<(Option<Arc<dyn TextService>>, Option<Arc<dyn TextService>>)> {
    let build = |role: &Option<config::AiRole>| -> Result<Option<Arc<dyn TextService>>> {
        role.as_ref()
            .map(|role| {
                HttpTextService::new(role.service.clone())
                    .map(|service| Arc::new(service) as Arc<dyn TextService>)
                    .context("building text service client")
            })
            .transpose()
    };
    Ok((build(&settings.ai_extract)?, build(&settings.ai_reply)?))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    /// Lease already held, or the record already exists.
    Duplicate,
    FilteredOut,
    Persisted { id: Uuid, sent: bool },
    PersistFailed,
}

/// Heuristic floor plus the optional AI pass, merged. Needs no channel or store.
pub struct FieldExtractor {
    heuristics: HeuristicExtractor,
    ai: Option<AiFieldExtractor>,
}

impl FieldExtractor {
    pub fn new(settings: &Settings, service: Option<Arc<dyn TextService>>) -> Self {
        let params = settings
            .ai_extract
            .as_ref()
            .map(|role| role.params)
            .unwrap_or_default();
        Self {
            heuristics: HeuristicExtractor::new(settings.contact_exclusions()),
            ai: service.map(|service| AiFieldExtractor::new(service, params)),
        }
    }

    pub fn heuristics(&self) -> &HeuristicExtractor {
        &self.heuristics
    }

    /// Never fails.
    pub async fn extract(&self, text: &str, author_hint: Option<&str>) -> ExtractionResult {
        let heuristic = self.heuristics.extract(text);
        let ai = match &self.ai {
            Some(ai) => ai.extract(text).await,
            None => None,
        };
        debug!(ai_result = ai.is_some(), "extraction finished");
        merge_fields(heuristic, ai, author_hint, |handle| {
            self.heuristics.is_excluded(handle)
        })
    }
}

pub struct Pipeline {
    source: Arc<dyn ChannelSource>,
    gate: IdempotencyGate,
    relevance: RelevanceFilter,
    extractor: FieldExtractor,
    vacancies: Arc<dyn VacancyStore>,
    synthesizer: Arc<ReplySynthesizer>,
    dispatcher: Option<OutreachDispatcher>,
    identities: IdentityCache,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(settings: &Settings, components: Components) -> Self {
        let stats = Arc::new(PipelineStats::new());
        let reply_params = settings
            .ai_reply
            .as_ref()
            .map(|role| role.params)
            .unwrap_or_default();

        let synthesizer = Arc::new(ReplySynthesizer::new(
            components.reply_service,
            reply_params,
            settings.candidate_profile.clone(),
        ));
        let dispatcher = settings.replies_enabled.then(|| {
            OutreachDispatcher::new(
                components.source.clone(),
                components.vacancies.clone(),
                synthesizer.clone(),
                DispatchSettings::from_settings(settings),
                stats.clone(),
            )
        });

        Self {
            source: components.source,
            gate: IdempotencyGate::new(components.leases, settings.lease_ttl),
            relevance: RelevanceFilter::new(&settings.keywords),
            extractor: FieldExtractor::new(settings, components.extract_service),
            vacancies: components.vacancies,
            synthesizer,
            dispatcher,
            identities: IdentityCache::new(),
            stats,
        }
    }

    pub fn source(&self) -> &Arc<dyn ChannelSource> {
        &self.source
    }

    pub fn vacancies(&self) -> &Arc<dyn VacancyStore> {
        &self.vacancies
    }

    pub fn identities(&self) -> &IdentityCache {
        &self.identities
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub async fn extract(&self, text: &str, author_hint: Option<&str>) -> ExtractionResult {
        self.extractor.extract(text, author_hint).await
    }

    pub async fn process(&self, post: &ChannelPost) -> PostOutcome {
        let key = post.lease_key();
        self.run_stages(post)
            .instrument(info_span!("post", channel_id = key.channel_id, post_id = key.post_id))
            .await
    }

    async fn run_stages(&self, post: &ChannelPost) -> PostOutcome {
        self.stats.bump(Counter::Observed);
        if !self.gate.try_admit(post.lease_key()).await {
            debug!("post already leased, skipping");
            self.stats.bump(Counter::Duplicate);
            return PostOutcome::Duplicate;
        }
        self.stats.bump(Counter::Admitted);

        if !self.relevance.is_relevant(&post.raw_text) {
            debug!("post has no matching keywords");
            self.stats.bump(Counter::FilteredOut);
            return PostOutcome::FilteredOut;
        }

        let fields = self
            .extract(&post.raw_text, post.author_hint.as_deref())
            .await
            .into_fields();
        let new = NewVacancy {
            channel_id: post.channel.id,
            channel_username: post.channel.username.clone(),
            post_id: post.post_id,
            full_text: post.raw_text.clone(),
            fields,
            published_at: post.published_at,
        };
        let mut record = match self.vacancies.create(new).await {
            Ok(record) => record,
            Err(StoreError::Duplicate(key)) => {
                info!(%key, "vacancy already recorded");
                self.stats.bump(Counter::Duplicate);
                return PostOutcome::Duplicate;
            }
            Err(err) => {
                error!(error = %err, "failed to persist vacancy, post is dropped");
                self.stats.bump(Counter::PersistFailed);
                return PostOutcome::PersistFailed;
            }
        };
        self.stats.bump(Counter::Persisted);
        info!(
            id = %record.id,
            position = record.fields.position.as_deref().unwrap_or_default(),
            contact = record.fields.contact.as_deref().unwrap_or_default(),
            "vacancy persisted"
        );

        let Some(dispatcher) = &self.dispatcher else {
            return PostOutcome::Persisted {
                id: record.id,
                sent: false,
            };
        };

        if record.fields.contact.is_some() {
            let reply = self
                .synthesizer
                .synthesize(ReplyContext {
                    contact: record.fields.contact.as_deref(),
                    fields: &record.fields,
                    raw_text: &record.full_text,
                })
                .await;
            if let Some(reply) = reply {
                if let Err(err) = self.vacancies.record_reply(record.id, &reply).await {
                    warn!(error = %err, "failed to store synthesized reply");
                }
                record.llm_reply = Some(reply);
            }
        }

        let candidates = record
            .fields
            .contact
            .iter()
            .cloned()
            .chain(self.extractor.heuristics().contact_handles(&post.raw_text))
            .collect::<Vec<_>>();
        self.stats.bump(Counter::DispatchAttempted);
        let report = dispatcher
            .dispatch(&record, candidates, record.llm_reply.as_deref())
            .await;
        PostOutcome::Persisted {
            id: record.id,
            sent: report.marked_sent,
        }
    }
}

/// Feed every live post to the pipeline until the subscription closes.
pub async fn run_live(pipeline: Arc<Pipeline>) -> Result<usize> {
    let mut posts = pipeline
        .source()
        .subscribe()
        .await
        .context("subscribing to live channel posts")?;
    let mut processed = 0usize;
    while let Some(post) = posts.recv().await {
        pipeline.process(&post).await;
        processed += 1;
    }
    info!(processed, "live subscription closed");
    Ok(processed)
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub live_posts: usize,
    pub backfill: Option<BackfillSummary>,
    pub stats: StatsSnapshot,
}

/// Backfill sweep and live subscription as two independent producers.
pub async fn run(pipeline: Arc<Pipeline>, settings: Arc<Settings>) -> Result<RunSummary> {
    let backfill = (settings.backfill.enabled && !settings.channels.is_empty()).then(|| {
        let pipeline = pipeline.clone();
        let settings = settings.clone();
        tokio::spawn(async move {
            run_backfill(&pipeline, &settings.channels, &settings.backfill, Utc::now()).await
        })
    });

    let live_posts = run_live(pipeline.clone()).await?;
    let backfill = match backfill {
        Some(handle) => Some(handle.await.context("backfill task failed")?),
        None => None,
    };
    Ok(RunSummary {
        live_posts,
        backfill,
        stats: pipeline.stats().snapshot(),
    })
}
