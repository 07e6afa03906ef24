use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use crate::config::BackfillSettings;
use crate::{Pipeline, PostOutcome};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    pub channels: usize,
    pub unresolved_channels: usize,
    pub posts: usize,
    pub persisted: usize,
    pub duplicates: usize,
    pub filtered_out: usize,
    pub persist_failed: usize,
}

impl BackfillSummary {
    fn record(&mut self, outcome: &PostOutcome) {
        self.posts += 1;
        match outcome {
            PostOutcome::Persisted { .. } => self.persisted += 1,
            PostOutcome::Duplicate => self.duplicates += 1,
            PostOutcome::FilteredOut => self.filtered_out += 1,
            PostOutcome::PersistFailed => self.persist_failed += 1,
        }
    }
}

/// One historical sweep over `channels`, newest posts first. A channel that
/// cannot be resolved or read is logged and skipped.
pub async fn run_backfill(
    pipeline: &Pipeline,
    channels: &[String],
    settings: &BackfillSettings,
    now: DateTime<Utc>,
) -> BackfillSummary {
    let since = settings.since(now);
    let mut summary = BackfillSummary::default();
    for reference in channels {
        summary.channels += 1;
        sweep_channel(pipeline, reference, settings, since, &mut summary)
            .instrument(info_span!("backfill", channel = %reference))
            .await;
    }
    info!(
        channels = summary.channels,
        posts = summary.posts,
        persisted = summary.persisted,
        duplicates = summary.duplicates,
        "backfill sweep finished"
    );
    summary
}

async fn sweep_channel(
    pipeline: &Pipeline,
    reference: &str,
    settings: &BackfillSettings,
    since: Option<DateTime<Utc>>,
    summary: &mut BackfillSummary,
) {
    let source = pipeline.source();
    let identity = match pipeline.identities().resolve(source.as_ref(), reference).await {
        Ok(identity) => identity,
        Err(err) => {
            warn!(error = %err, "cannot resolve channel, skipping");
            summary.unresolved_channels += 1;
            return;
        }
    };
    let posts = match source.iterate_posts(&identity, settings.limit, since).await {
        Ok(posts) => posts,
        Err(err) => {
            warn!(error = %err, "cannot read channel history, skipping");
            return;
        }
    };
    info!(posts = posts.len(), "backfilling channel");
    for (index, post) in posts.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(settings.delay).await;
        }
        let outcome = pipeline.process(post).await;
        summary.record(&outcome);
    }
}
