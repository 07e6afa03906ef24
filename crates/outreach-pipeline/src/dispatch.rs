use std::sync::Arc;
use std::time::Duration;

use outreach_adapters::ChannelSource;
use outreach_core::{normalize_handle, same_handle, VacancyRecord};
use outreach_storage::VacancyStore;
use tracing::{info, info_span, warn, Instrument};

use crate::config::{Attachment, Settings};
use crate::reply::{impersonal_greeting, render_static_template, ReplyContext, ReplySynthesizer};
use crate::stats::{Counter, PipelineStats};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_targets: usize,
    pub message_delay: Duration,
    pub dry_run: bool,
    pub static_template: Option<String>,
    pub attachment: Option<Attachment>,
}

impl DispatchSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_targets: settings.max_targets,
            message_delay: settings.message_delay,
            dry_run: settings.dry_run,
            static_template: settings.reply_template.clone(),
            attachment: settings.attachment.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    Sent,
    DryRun,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<(String, TargetOutcome)>,
    pub marked_sent: bool,
}

impl DispatchReport {
    pub fn any_sent(&self) -> bool {
        self.count(&TargetOutcome::Sent) > 0
    }

    pub fn dry_runs(&self) -> usize {
        self.count(&TargetOutcome::DryRun)
    }

    fn count(&self, wanted: &TargetOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| o == wanted).count()
    }
}

/// Unique `@handles` in input order, at most `cap`.
pub fn select_targets<I>(handles: I, cap: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut targets: Vec<String> = Vec::new();
    for handle in handles.into_iter().filter_map(|h| normalize_handle(&h)) {
        if targets.len() == cap {
            break;
        }
        if !targets.iter().any(|t| t.eq_ignore_ascii_case(&handle)) {
            targets.push(handle);
        }
    }
    targets
}

/// Sequential, rate-limited outbound messaging for one persisted vacancy.
pub struct OutreachDispatcher {
    source: Arc<dyn ChannelSource>,
    store: Arc<dyn VacancyStore>,
    synthesizer: Arc<ReplySynthesizer>,
    settings: DispatchSettings,
    stats: Arc<PipelineStats>,
}

impl OutreachDispatcher {
    pub fn new(
        source: Arc<dyn ChannelSource>,
        store: Arc<dyn VacancyStore>,
        synthesizer: Arc<ReplySynthesizer>,
        settings: DispatchSettings,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            source,
            store,
            synthesizer,
            settings,
            stats,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Message every target in order. The delay is applied before each target,
    /// the first included. The record is marked sent when any send succeeded.
    pub async fn dispatch(
        &self,
        record: &VacancyRecord,
        candidates: Vec<String>,
        pre_generated: Option<&str>,
    ) -> DispatchReport {
        let targets = select_targets(candidates, self.settings.max_targets);
        let mut report = DispatchReport::default();

        for target in targets {
            let outcome = self
                .message_target(record, &target, pre_generated)
                .instrument(info_span!("dispatch", recipient = %target))
                .await;
            report.outcomes.push((target, outcome));
        }

        if report.any_sent() {
            match self.store.mark_sent(record.id).await {
                Ok(()) => report.marked_sent = true,
                Err(err) => warn!(id = %record.id, error = %err, "failed to mark vacancy as sent"),
            }
        }
        report
    }

    async fn message_target(
        &self,
        record: &VacancyRecord,
        target: &str,
        pre_generated: Option<&str>,
    ) -> TargetOutcome {
        tokio::time::sleep(self.settings.message_delay).await;

        let identity = match self.source.resolve_identity(target).await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(error = %err, "could not resolve outreach target");
                self.stats.bump(Counter::SendFailure);
                return TargetOutcome::Failed(err.to_string());
            }
        };

        let Some(text) = self.payload_for(record, target, pre_generated).await else {
            info!("no message available for target, skipping");
            return TargetOutcome::Skipped;
        };

        if self.settings.dry_run {
            info!(chars = text.chars().count(), "dry-run: would send message");
            self.stats.bump(Counter::DryRunMessage);
            return TargetOutcome::DryRun;
        }

        if let Err(err) = self.source.send_text(&identity, &text).await {
            warn!(error = %err, "outbound message failed");
            self.stats.bump(Counter::SendFailure);
            return TargetOutcome::Failed(err.to_string());
        }
        info!("outbound message sent");
        self.stats.bump(Counter::MessageSent);

        if let Some(attachment) = &self.settings.attachment {
            if let Err(err) = self
                .source
                .send_file(&identity, &attachment.path, attachment.caption.as_deref())
                .await
            {
                warn!(error = %err, path = %attachment.path.display(), "attachment failed");
            }
        }
        TargetOutcome::Sent
    }

    /// Pre-generated reply, else a fresh one for the derived contact only,
    /// else the static template. Targets other than the derived contact get
    /// the pre-generated reply without a personal greeting.
    async fn payload_for(
        &self,
        record: &VacancyRecord,
        target: &str,
        pre_generated: Option<&str>,
    ) -> Option<String> {
        let is_derived_contact = record
            .fields
            .contact
            .as_deref()
            .is_some_and(|contact| same_handle(contact, target));
        if let Some(text) = pre_generated {
            return Some(if is_derived_contact {
                text.to_string()
            } else {
                impersonal_greeting(text)
            });
        }
        if is_derived_contact {
            let generated = self
                .synthesizer
                .synthesize(ReplyContext {
                    contact: Some(target),
                    fields: &record.fields,
                    raw_text: &record.full_text,
                })
                .await;
            if generated.is_some() {
                return generated;
            }
        }
        self.settings
            .static_template
            .as_deref()
            .and_then(|template| render_static_template(template, &record.fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use outreach_adapters::{ChannelFixture, FixtureChannelSource, OutboundBody};
    use outreach_core::{Identity, NewVacancy, VacancyFields, VacancyStatus};
    use outreach_storage::MemoryVacancyStore;

    const DELAY: Duration = Duration::from_secs(20);

    fn source() -> Arc<FixtureChannelSource> {
        Arc::new(FixtureChannelSource::new(ChannelFixture {
            fixture_id: "dispatch".into(),
            channels: Vec::new(),
            users: ["anna_hr", "ivan_petrov", "recruiter1"]
                .iter()
                .enumerate()
                .map(|(i, name)| Identity::new(500 + i as i64, Some(name.to_string())))
                .collect(),
            live: Vec::new(),
            notes: None,
        }))
    }

    async fn persisted(store: &MemoryVacancyStore) -> VacancyRecord {
        store
            .create(NewVacancy {
                channel_id: -1001234567890,
                channel_username: Some("devops_jobs".into()),
                post_id: 101,
                full_text: "#devops DevOps в компании Acme, пишите @recruiter1".into(),
                fields: VacancyFields {
                    position: Some("DevOps".into()),
                    company: Some("Acme".into()),
                    contact: Some("@recruiter1".into()),
                    ..Default::default()
                },
                published_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    fn build_dispatcher(
        source: Arc<FixtureChannelSource>,
        store: Arc<MemoryVacancyStore>,
        settings: DispatchSettings,
    ) -> (OutreachDispatcher, Arc<PipelineStats>) {
        let stats = Arc::new(PipelineStats::new());
        let dispatcher = OutreachDispatcher::new(
            source,
            store,
            Arc::new(ReplySynthesizer::template_only()),
            settings,
            stats.clone(),
        );
        (dispatcher, stats)
    }

    fn settings(dry_run: bool, max_targets: usize) -> DispatchSettings {
        DispatchSettings {
            max_targets,
            message_delay: DELAY,
            dry_run,
            static_template: None,
            attachment: None,
        }
    }

    #[test]
    fn targets_are_deduplicated_then_capped() {
        let handles = ["@Anna_HR", "t.me/anna_hr", "not a handle", "@ivan_petrov", "@recruiter1"]
            .map(String::from);
        assert_eq!(select_targets(handles.clone(), 2), vec!["@Anna_HR", "@ivan_petrov"]);
        assert_eq!(select_targets(handles, 10).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_respects_cap_and_delay_without_sending() {
        let source = source();
        let store = Arc::new(MemoryVacancyStore::new());
        let record = persisted(&store).await;
        let (dispatcher, stats) = build_dispatcher(source.clone(), store.clone(), settings(true, 2));

        let started = tokio::time::Instant::now();
        let report = dispatcher
            .dispatch(
                &record,
                vec!["@anna_hr".into(), "@ivan_petrov".into(), "@recruiter1".into()],
                Some("Здравствуйте! Интересует вакансия DevOps в Acme."),
            )
            .await;

        assert_eq!(started.elapsed(), DELAY * 2);
        assert_eq!(report.dry_runs(), 2);
        assert!(!report.any_sent());
        assert_eq!(stats.snapshot().dry_run_messages, 2);
        assert!(source.outbox().await.is_empty());
        let stored = store.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, VacancyStatus::Processed);
        assert!(!stored.dm_sent);
    }

    #[tokio::test(start_paused = true)]
    async fn one_success_marks_the_record_sent() {
        let source = source();
        let store = Arc::new(MemoryVacancyStore::new());
        let record = persisted(&store).await;
        let (dispatcher, stats) = build_dispatcher(source.clone(), store.clone(), settings(false, 3));

        let report = dispatcher
            .dispatch(
                &record,
                vec!["@ghost_user".into(), "@recruiter1".into()],
                None,
            )
            .await;

        assert!(matches!(report.outcomes[0].1, TargetOutcome::Failed(_)));
        assert_eq!(report.outcomes[1].1, TargetOutcome::Sent);
        assert!(report.marked_sent);
        let snap = stats.snapshot();
        assert_eq!((snap.messages_sent, snap.send_failures), (1, 1));

        let outbox = source.outbox().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].target.username.as_deref(), Some("recruiter1"));
        let OutboundBody::Text(text) = &outbox[0].body else {
            panic!("expected a text message");
        };
        assert!(text.contains("DevOps") && text.contains("Acme"));

        let stored = store.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, VacancyStatus::Sent);
        assert!(stored.dm_sent);
    }

    #[tokio::test(start_paused = true)]
    async fn non_contact_targets_need_a_static_template() {
        let source = source();
        let store = Arc::new(MemoryVacancyStore::new());
        let record = persisted(&store).await;

        let (dispatcher, _) = build_dispatcher(source.clone(), store.clone(), settings(false, 3));
        let report = dispatcher
            .dispatch(&record, vec!["@anna_hr".into()], None)
            .await;
        assert_eq!(report.outcomes[0].1, TargetOutcome::Skipped);
        assert!(!report.marked_sent);

        let mut with_template = settings(false, 3);
        with_template.static_template = Some("Добрый день! Интересует {position} в {company}.".into());
        let (dispatcher, _) = build_dispatcher(source.clone(), store.clone(), with_template);
        let report = dispatcher
            .dispatch(&record, vec!["@anna_hr".into()], None)
            .await;
        assert_eq!(report.outcomes[0].1, TargetOutcome::Sent);
        assert_eq!(
            source.outbox().await[0].body,
            OutboundBody::Text("Добрый день! Интересует DevOps в Acme.".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn named_greeting_reaches_the_derived_contact_only() {
        let source = source();
        let store = Arc::new(MemoryVacancyStore::new());
        let record = persisted(&store).await;
        let (dispatcher, _) = build_dispatcher(source.clone(), store.clone(), settings(false, 3));

        let reply = "Здравствуйте, Анна! Меня заинтересовала позиция «DevOps» в компании Acme.";
        let report = dispatcher
            .dispatch(
                &record,
                vec!["@recruiter1".into(), "@anna_hr".into()],
                Some(reply),
            )
            .await;
        assert!(report.marked_sent);

        let outbox = source.outbox().await;
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox[0].target.username.as_deref(), Some("recruiter1"));
        assert_eq!(outbox[0].body, OutboundBody::Text(reply.into()));
        assert_eq!(outbox[1].target.username.as_deref(), Some("anna_hr"));
        assert_eq!(
            outbox[1].body,
            OutboundBody::Text(
                "Здравствуйте! Меня заинтересовала позиция «DevOps» в компании Acme.".into()
            )
        );
    }

    #[tokio::test(start_paused = true)]
    async fn attachment_follows_a_successful_send() {
        let source = source();
        let store = Arc::new(MemoryVacancyStore::new());
        let record = persisted(&store).await;
        let cv = tempfile::NamedTempFile::new().unwrap();

        let mut with_attachment = settings(false, 3);
        with_attachment.attachment = Some(Attachment {
            path: cv.path().to_path_buf(),
            caption: Some("CV".into()),
        });
        let (dispatcher, _) = build_dispatcher(source.clone(), store.clone(), with_attachment);
        dispatcher
            .dispatch(&record, vec!["@recruiter1".into()], Some("Здравствуйте!"))
            .await;

        let outbox = source.outbox().await;
        assert_eq!(outbox.len(), 2);
        assert!(matches!(
            &outbox[1].body,
            OutboundBody::File { caption: Some(c), .. } if c == "CV"
        ));
    }
}
