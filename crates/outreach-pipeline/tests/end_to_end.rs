mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{directory_source, harness, harness_with, post, settings, CHANNEL_ID, E2E_TEXT};
use outreach_adapters::OutboundBody;
use outreach_core::{LeaseKey, NewVacancy, VacancyRecord, VacancyStatus, PLACEHOLDER_POSITION};
use outreach_pipeline::{Components, FieldExtractor, Pipeline, PostOutcome};
use outreach_storage::{
    LeaseStore, MemoryLeaseStore, StoreError, VacancyPage, VacancyQuery, VacancyStore,
};
use uuid::Uuid;

struct UnreachableLeases;

#[async_trait]
impl LeaseStore for UnreachableLeases {
    async fn try_acquire(
        &self,
        _key: LeaseKey,
        _ttl: std::time::Duration,
    ) -> Result<bool, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }
}

/// Record store whose database is down: every write and read fails.
struct DownVacancyStore;

fn pool_timeout() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl VacancyStore for DownVacancyStore {
    async fn create(&self, _new: NewVacancy) -> Result<VacancyRecord, StoreError> {
        Err(pool_timeout())
    }

    async fn find_by_id(&self, _id: Uuid) -> Result<Option<VacancyRecord>, StoreError> {
        Err(pool_timeout())
    }

    async fn find_by_post(
        &self,
        _channel_id: i64,
        _post_id: i64,
    ) -> Result<Option<VacancyRecord>, StoreError> {
        Err(pool_timeout())
    }

    async fn record_reply(&self, _id: Uuid, _reply: &str) -> Result<(), StoreError> {
        Err(pool_timeout())
    }

    async fn mark_sent(&self, _id: Uuid) -> Result<(), StoreError> {
        Err(pool_timeout())
    }

    async fn update_status(&self, _id: Uuid, _status: VacancyStatus) -> Result<(), StoreError> {
        Err(pool_timeout())
    }

    async fn list(&self, _query: &VacancyQuery) -> Result<VacancyPage, StoreError> {
        Err(pool_timeout())
    }
}

#[tokio::test(start_paused = true)]
async fn relevant_post_is_extracted_and_persisted() {
    let settings = settings(&[("OUTREACH_KEYWORDS", "devops")]);
    let h = harness(&settings, directory_source());

    let outcome = h.pipeline.process(&post(1, E2E_TEXT)).await;
    assert!(matches!(outcome, PostOutcome::Persisted { sent: false, .. }));

    let record = h
        .vacancies
        .find_by_post(CHANNEL_ID, 1)
        .await
        .unwrap()
        .expect("record stored");
    assert_eq!(record.fields.position.as_deref(), Some(PLACEHOLDER_POSITION));
    assert_eq!(record.fields.company.as_deref(), Some("Acme"));
    assert_eq!(record.fields.work_format.as_deref(), Some("Удалённо"));
    assert_eq!(record.fields.contact.as_deref(), Some("@recruiter1"));
    assert_eq!(record.fields.hashtags, vec!["#devops".to_string()]);
    assert_eq!(record.status, VacancyStatus::Processed);
    assert!(!record.dm_sent);
    assert_eq!(record.channel_username.as_deref(), Some("devops_jobs"));
    assert!(h.source.outbox().await.is_empty());

    let snapshot = h.pipeline.stats().snapshot();
    assert_eq!(snapshot.persisted, 1);
    assert_eq!(snapshot.dispatch_attempted, 0);
}

#[tokio::test(start_paused = true)]
async fn enabled_replies_reach_the_recruiter() {
    let settings = settings(&[
        ("OUTREACH_REPLIES_ENABLED", "true"),
        ("OUTREACH_DRY_RUN", "false"),
    ]);
    let h = harness(&settings, directory_source());

    let outcome = h.pipeline.process(&post(1, E2E_TEXT)).await;
    assert!(matches!(outcome, PostOutcome::Persisted { sent: true, .. }));

    let record = h.vacancies.find_by_post(CHANNEL_ID, 1).await.unwrap().unwrap();
    assert_eq!(record.status, VacancyStatus::Sent);
    assert!(record.dm_sent);
    let reply = record.llm_reply.expect("template reply stored");
    assert!(reply.contains("Acme"));

    let outbox = h.source.outbox().await;
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].target.username.as_deref(), Some("recruiter1"));
    assert_eq!(outbox[0].body, OutboundBody::Text(reply));
}

#[tokio::test(start_paused = true)]
async fn dry_run_composes_but_never_sends() {
    let settings = settings(&[("OUTREACH_REPLIES_ENABLED", "true")]);
    assert!(settings.dry_run);
    let h = harness(&settings, directory_source());

    let outcome = h.pipeline.process(&post(1, E2E_TEXT)).await;
    assert!(matches!(outcome, PostOutcome::Persisted { sent: false, .. }));
    assert!(h.source.outbox().await.is_empty());

    let record = h.vacancies.find_by_post(CHANNEL_ID, 1).await.unwrap().unwrap();
    assert_eq!(record.status, VacancyStatus::Processed);
    assert!(record.llm_reply.is_some());
    assert_eq!(h.pipeline.stats().snapshot().dry_run_messages, 1);
}

#[tokio::test(start_paused = true)]
async fn keywords_filter_unrelated_posts() {
    let settings = settings(&[("OUTREACH_KEYWORDS", "java, #golang")]);
    let h = harness(&settings, directory_source());

    assert_eq!(
        h.pipeline.process(&post(1, E2E_TEXT)).await,
        PostOutcome::FilteredOut
    );
    assert!(h.vacancies.all().await.is_empty());
    // The lease is still held, so the post is not evaluated again.
    assert_eq!(
        h.pipeline.process(&post(1, E2E_TEXT)).await,
        PostOutcome::Duplicate
    );

    let outcome = h
        .pipeline
        .process(&post(2, "#Java разработчик в компании Globex, пишите @anna_hr"))
        .await;
    assert!(matches!(outcome, PostOutcome::Persisted { .. }));
}

#[tokio::test(start_paused = true)]
async fn repeated_post_is_processed_once() {
    let settings = settings(&[]);
    let h = harness(&settings, directory_source());

    assert!(matches!(
        h.pipeline.process(&post(1, E2E_TEXT)).await,
        PostOutcome::Persisted { .. }
    ));
    assert_eq!(h.pipeline.process(&post(1, E2E_TEXT)).await, PostOutcome::Duplicate);
    assert_eq!(h.vacancies.all().await.len(), 1);

    let snapshot = h.pipeline.stats().snapshot();
    assert_eq!(snapshot.observed, 2);
    assert_eq!(snapshot.admitted, 1);
    assert_eq!(snapshot.duplicates, 1);
}

#[tokio::test(start_paused = true)]
async fn unreachable_lease_store_fails_open() {
    let settings = settings(&[]);
    let h = harness_with(&settings, directory_source(), Arc::new(UnreachableLeases));

    assert!(matches!(
        h.pipeline.process(&post(1, E2E_TEXT)).await,
        PostOutcome::Persisted { .. }
    ));
    // Both passes are admitted; the unique record key still holds.
    assert_eq!(h.pipeline.process(&post(1, E2E_TEXT)).await, PostOutcome::Duplicate);
    assert_eq!(h.vacancies.all().await.len(), 1);
    assert_eq!(h.pipeline.stats().snapshot().admitted, 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_copies_of_a_post_persist_once() {
    let settings = settings(&[]);
    let h = harness(&settings, directory_source());

    let tasks = (0..8)
        .map(|_| {
            let pipeline = h.pipeline.clone();
            tokio::spawn(async move { pipeline.process(&post(1, E2E_TEXT)).await })
        })
        .collect::<Vec<_>>();
    let mut persisted = 0;
    for task in tasks {
        if matches!(task.await.unwrap(), PostOutcome::Persisted { .. }) {
            persisted += 1;
        }
    }
    assert_eq!(persisted, 1);
    assert_eq!(h.vacancies.all().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn channel_handle_is_never_the_contact() {
    let settings = settings(&[]);
    let h = harness(&settings, directory_source());

    let mut channel_post = post(
        3,
        "#devops Вакансия SRE в компании Hooli, подробности в @devops_jobs, резюме: @anna_hr",
    );
    channel_post.author_hint = Some("devops_jobs".into());
    h.pipeline.process(&channel_post).await;

    let record = h.vacancies.find_by_post(CHANNEL_ID, 3).await.unwrap().unwrap();
    assert_eq!(record.fields.contact.as_deref(), Some("@anna_hr"));
}

#[tokio::test(start_paused = true)]
async fn failed_persist_drops_the_post_without_outreach() {
    let settings = settings(&[
        ("OUTREACH_REPLIES_ENABLED", "true"),
        ("OUTREACH_DRY_RUN", "false"),
    ]);
    let source = directory_source();
    let pipeline = Pipeline::new(
        &settings,
        Components {
            source: source.clone(),
            leases: Arc::new(MemoryLeaseStore::new()),
            vacancies: Arc::new(DownVacancyStore),
            extract_service: None,
            reply_service: None,
        },
    );

    assert_eq!(pipeline.process(&post(1, E2E_TEXT)).await, PostOutcome::PersistFailed);
    // The lease is spent, so the post is not retried.
    assert_eq!(pipeline.process(&post(1, E2E_TEXT)).await, PostOutcome::Duplicate);
    assert!(source.outbox().await.is_empty());

    let snapshot = pipeline.stats().snapshot();
    assert_eq!(snapshot.persist_failed, 1);
    assert_eq!(snapshot.persisted, 0);
    assert_eq!(snapshot.dispatch_attempted, 0);
    assert_eq!(snapshot.messages_sent, 0);
}

#[tokio::test]
async fn standalone_extraction_needs_no_channel_source() {
    let settings = settings(&[("OUTREACH_FIXTURE_PATH", "/definitely/missing.json")]);
    let extractor = FieldExtractor::new(&settings, None);

    let result = extractor
        .extract(
            "#devops Вакансия SRE в компании Hooli, подробности в @devops_jobs",
            Some("devops_jobs"),
        )
        .await;
    assert_eq!(result.position.get().map(String::as_str), Some(PLACEHOLDER_POSITION));
    assert_eq!(result.company.get().map(String::as_str), Some("Hooli"));
    assert!(!result.contact.is_present());

    let result = extractor.extract(E2E_TEXT, None).await;
    assert_eq!(result.contact.get().map(String::as_str), Some("@recruiter1"));
    assert_eq!(result.work_format.get().map(String::as_str), Some("Удалённо"));
}
