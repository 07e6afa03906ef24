#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use outreach_adapters::{ChannelFixture, FixtureChannel, FixtureChannelSource};
use outreach_core::{ChannelPost, Identity};
use outreach_pipeline::{Components, Pipeline, Settings};
use outreach_storage::{LeaseStore, MemoryLeaseStore, MemoryVacancyStore, VacancyStore};

pub const CHANNEL_ID: i64 = -1001234567890;
pub const E2E_TEXT: &str =
    "#devops Вакансия DevOps в компании Acme, удаленно, 250000-300000 руб, пишите @recruiter1";

pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root")
}

pub fn settings(pairs: &[(&str, &str)]) -> Settings {
    let mut env: HashMap<String, String> = HashMap::from([
        ("DATABASE_URL".to_string(), "postgres://unused".to_string()),
        ("OUTREACH_CHANNELS".to_string(), "devops_jobs".to_string()),
    ]);
    env.extend(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    Settings::from_sources(None, &move |name: &str| env.get(name).cloned()).expect("settings")
}

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub fn channel() -> Identity {
    Identity::new(CHANNEL_ID, Some("devops_jobs".into()))
}

pub fn post(post_id: i64, text: &str) -> ChannelPost {
    ChannelPost {
        channel: channel(),
        post_id,
        raw_text: text.to_string(),
        published_at: at(1, 9),
        author_hint: None,
    }
}

/// Small directory: the devops channel and a few recruiters, no history.
pub fn directory_source() -> Arc<FixtureChannelSource> {
    Arc::new(FixtureChannelSource::new(ChannelFixture {
        fixture_id: "directory".into(),
        channels: vec![FixtureChannel {
            id: CHANNEL_ID,
            username: "devops_jobs".into(),
            posts: Vec::new(),
        }],
        users: ["recruiter1", "anna_hr", "ivan_petrov"]
            .iter()
            .enumerate()
            .map(|(i, name)| Identity::new(700 + i as i64, Some(name.to_string())))
            .collect(),
        live: Vec::new(),
        notes: None,
    }))
}

pub fn sample_source() -> Arc<FixtureChannelSource> {
    Arc::new(
        FixtureChannelSource::from_path(workspace_root().join("fixtures/channels/sample.json"))
            .expect("sample fixture"),
    )
}

pub struct Harness {
    pub pipeline: Arc<Pipeline>,
    pub source: Arc<FixtureChannelSource>,
    pub vacancies: Arc<MemoryVacancyStore>,
}

pub fn harness(settings: &Settings, source: Arc<FixtureChannelSource>) -> Harness {
    harness_with(settings, source, Arc::new(MemoryLeaseStore::new()))
}

pub fn harness_with(
    settings: &Settings,
    source: Arc<FixtureChannelSource>,
    leases: Arc<dyn LeaseStore>,
) -> Harness {
    let vacancies = Arc::new(MemoryVacancyStore::new());
    let pipeline = Pipeline::new(
        settings,
        Components {
            source: source.clone(),
            leases,
            vacancies: vacancies.clone() as Arc<dyn VacancyStore>,
            extract_service: None,
            reply_service: None,
        },
    );
    Harness {
        pipeline: Arc::new(pipeline),
        source,
        vacancies,
    }
}
