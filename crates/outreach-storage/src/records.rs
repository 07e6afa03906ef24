use async_trait::async_trait;
use chrono::Utc;
use outreach_core::{LeaseKey, NewVacancy, VacancyFields, VacancyRecord, VacancyStatus};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::StoreError;

#[derive(Debug, Clone, Deserialize)]
pub struct VacancyQuery {
    #[serde(default, rename = "q")]
    pub search: Option<String>,
    #[serde(default)]
    pub status: Option<VacancyStatus>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

fn default_page() -> usize {
    1
}

fn default_per_page() -> usize {
    20
}

impl Default for VacancyQuery {
    fn default() -> Self {
        Self {
            search: None,
            status: None,
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl VacancyQuery {
    fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn per_page(&self) -> usize {
        self.per_page.clamp(1, 200)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VacancyPage {
    pub items: Vec<VacancyRecord>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
}

fn page_bounds(total: usize, query: &VacancyQuery) -> (usize, usize, usize) {
    let per_page = query.per_page();
    let total_pages = total.max(1).div_ceil(per_page);
    let page = query.page.clamp(1, total_pages);
    (page, per_page, total_pages)
}

/// Persisted-record store. The orchestrator creates and reads; the dispatcher
/// flips delivery status; listing/search serves the operational surface.
#[async_trait]
pub trait VacancyStore: Send + Sync {
    async fn create(&self, new: NewVacancy) -> Result<VacancyRecord, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<VacancyRecord>, StoreError>;
    async fn find_by_post(
        &self,
        channel_id: i64,
        post_id: i64,
    ) -> Result<Option<VacancyRecord>, StoreError>;
    async fn record_reply(&self, id: Uuid, reply: &str) -> Result<(), StoreError>;
    async fn mark_sent(&self, id: Uuid) -> Result<(), StoreError>;
    async fn update_status(&self, id: Uuid, status: VacancyStatus) -> Result<(), StoreError>;
    async fn list(&self, query: &VacancyQuery) -> Result<VacancyPage, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgVacancyStore {
    pool: PgPool,
}

impl PgVacancyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    id, channel_id, channel_username, post_id, full_text,
    position, company, salary, location, work_format, employment, contact,
    hashtags, stack, tasks, summary, llm_reply, status, dm_sent,
    processed_at, created_at, updated_at
"#;

fn row_to_record(row: &PgRow) -> Result<VacancyRecord, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<VacancyStatus>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;
    Ok(VacancyRecord {
        id: row.try_get("id")?,
        channel_id: row.try_get("channel_id")?,
        channel_username: row.try_get("channel_username")?,
        post_id: row.try_get("post_id")?,
        full_text: row.try_get("full_text")?,
        fields: VacancyFields {
            position: row.try_get("position")?,
            company: row.try_get("company")?,
            salary: row.try_get("salary")?,
            location: row.try_get("location")?,
            work_format: row.try_get("work_format")?,
            employment: row.try_get("employment")?,
            contact: row.try_get("contact")?,
            hashtags: row.try_get("hashtags")?,
            stack: row.try_get("stack")?,
            tasks: row.try_get("tasks")?,
            summary: row.try_get("summary")?,
        },
        llm_reply: row.try_get("llm_reply")?,
        status,
        dm_sent: row.try_get("dm_sent")?,
        processed_at: row.try_get("processed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn expect_updated(id: Uuid, rows_affected: u64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        Err(StoreError::NotFound(id))
    } else {
        Ok(())
    }
}

#[async_trait]
impl VacancyStore for PgVacancyStore {
    async fn create(&self, new: NewVacancy) -> Result<VacancyRecord, StoreError> {
        let key = LeaseKey {
            channel_id: new.channel_id,
            post_id: new.post_id,
        };
        let record = VacancyRecord::from_new(new, Utc::now());
        let result = sqlx::query(
            r#"
            INSERT INTO vacancies (
                id, channel_id, channel_username, post_id, full_text,
                position, company, salary, location, work_format, employment, contact,
                hashtags, stack, tasks, summary, llm_reply, status, dm_sent,
                processed_at, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18, $19, $20, $21, $22
            )
            "#,
        )
        .bind(record.id)
        .bind(record.channel_id)
        .bind(&record.channel_username)
        .bind(record.post_id)
        .bind(&record.full_text)
        .bind(&record.fields.position)
        .bind(&record.fields.company)
        .bind(&record.fields.salary)
        .bind(&record.fields.location)
        .bind(&record.fields.work_format)
        .bind(&record.fields.employment)
        .bind(&record.fields.contact)
        .bind(&record.fields.hashtags)
        .bind(&record.fields.stack)
        .bind(&record.fields.tasks)
        .bind(&record.fields.summary)
        .bind(&record.llm_reply)
        .bind(record.status.as_str())
        .bind(record.dm_sent)
        .bind(record.processed_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(id = %record.id, %key, "vacancy inserted");
                Ok(record)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Duplicate(key))
            }
            Err(err) => Err(StoreError::Database(err)),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<VacancyRecord>, StoreError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM vacancies WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_record).transpose()?)
    }

    async fn find_by_post(
        &self,
        channel_id: i64,
        post_id: i64,
    ) -> Result<Option<VacancyRecord>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM vacancies WHERE channel_id = $1 AND post_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(channel_id)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_record).transpose()?)
    }

    async fn record_reply(&self, id: Uuid, reply: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE vacancies
               SET llm_reply = $2,
                   updated_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reply)
        .execute(&self.pool)
        .await?;
        expect_updated(id, result.rows_affected())
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE vacancies
               SET status = 'sent',
                   dm_sent = TRUE,
                   updated_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        expect_updated(id, result.rows_affected())
    }

    async fn update_status(&self, id: Uuid, status: VacancyStatus) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE vacancies
               SET status = $2,
                   updated_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        expect_updated(id, result.rows_affected())
    }

    async fn list(&self, query: &VacancyQuery) -> Result<VacancyPage, StoreError> {
        let status = query.status.map(|s| s.as_str());
        let pattern = query.search_term().map(like_pattern);
        let filter = r#"
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::text IS NULL
                    OR full_text ILIKE $2
                    OR position ILIKE $2
                    OR company ILIKE $2)
        "#;

        let count_sql = format!("SELECT COUNT(*) AS total FROM vacancies {filter}");
        let total: i64 = sqlx::query(&count_sql)
            .bind(status)
            .bind(&pattern)
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;
        let total = usize::try_from(total).unwrap_or_default();
        let (page, per_page, total_pages) = page_bounds(total, query);

        let list_sql = format!(
            "SELECT {SELECT_COLUMNS} FROM vacancies {filter} ORDER BY created_at DESC, id LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query(&list_sql)
            .bind(status)
            .bind(&pattern)
            .bind(per_page as i64)
            .bind(((page - 1) * per_page) as i64)
            .fetch_all(&self.pool)
            .await?;
        let items = rows
            .iter()
            .map(row_to_record)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(VacancyPage {
            items,
            page,
            per_page,
            total,
            total_pages,
        })
    }
}

/// In-memory store mirroring the Postgres semantics, including the unique pair.
#[derive(Debug, Default)]
pub struct MemoryVacancyStore {
    records: Mutex<Vec<VacancyRecord>>,
}

impl MemoryVacancyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<VacancyRecord> {
        self.records.lock().await.clone()
    }

    async fn update<F>(&self, id: Uuid, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut VacancyRecord) + Send,
    {
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        apply(record);
        record.updated_at = Utc::now();
        Ok(())
    }
}

fn matches_search(record: &VacancyRecord, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    [
        Some(record.full_text.as_str()),
        record.fields.position.as_deref(),
        record.fields.company.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|hay| hay.to_lowercase().contains(&needle))
}

#[async_trait]
impl VacancyStore for MemoryVacancyStore {
    async fn create(&self, new: NewVacancy) -> Result<VacancyRecord, StoreError> {
        let mut records = self.records.lock().await;
        if records
            .iter()
            .any(|r| r.channel_id == new.channel_id && r.post_id == new.post_id)
        {
            return Err(StoreError::Duplicate(LeaseKey {
                channel_id: new.channel_id,
                post_id: new.post_id,
            }));
        }
        let record = VacancyRecord::from_new(new, Utc::now());
        records.push(record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<VacancyRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_post(
        &self,
        channel_id: i64,
        post_id: i64,
    ) -> Result<Option<VacancyRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .find(|r| r.channel_id == channel_id && r.post_id == post_id)
            .cloned())
    }

    async fn record_reply(&self, id: Uuid, reply: &str) -> Result<(), StoreError> {
        let reply = reply.to_string();
        self.update(id, move |r| r.llm_reply = Some(reply)).await
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), StoreError> {
        self.update(id, |r| {
            r.status = VacancyStatus::Sent;
            r.dm_sent = true;
        })
        .await
    }

    async fn update_status(&self, id: Uuid, status: VacancyStatus) -> Result<(), StoreError> {
        self.update(id, move |r| r.status = status).await
    }

    async fn list(&self, query: &VacancyQuery) -> Result<VacancyPage, StoreError> {
        let records = self.records.lock().await;
        let mut filtered = records
            .iter()
            .filter(|r| query.status.map_or(true, |s| r.status == s))
            .filter(|r| query.search_term().map_or(true, |q| matches_search(r, q)))
            .cloned()
            .collect::<Vec<_>>();
        filtered.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total = filtered.len();
        let (page, per_page, total_pages) = page_bounds(total, query);
        let items = filtered
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();

        Ok(VacancyPage {
            items,
            page,
            per_page,
            total,
            total_pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn new_vacancy(post_id: i64, position: &str, company: Option<&str>) -> NewVacancy {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap();
        NewVacancy {
            channel_id: -1001,
            channel_username: Some("devops_jobs".into()),
            post_id,
            full_text: format!("#devops {position} post {post_id}"),
            fields: VacancyFields {
                position: Some(position.to_string()),
                company: company.map(ToString::to_string),
                ..VacancyFields::default()
            },
            published_at: base + Duration::minutes(post_id),
        }
    }

    #[tokio::test]
    async fn unique_pair_rejects_second_create() {
        let store = MemoryVacancyStore::new();
        store.create(new_vacancy(1, "SRE", None)).await.unwrap();
        let err = store.create(new_vacancy(1, "SRE", None)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(key) if key.post_id == 1));
        assert_eq!(store.all().await.len(), 1);
    }

    #[tokio::test]
    async fn mark_sent_flips_status_and_flag() {
        let store = MemoryVacancyStore::new();
        let record = store.create(new_vacancy(5, "SRE", None)).await.unwrap();
        store.record_reply(record.id, "Здравствуйте!").await.unwrap();
        store.mark_sent(record.id).await.unwrap();

        let stored = store.find_by_post(-1001, 5).await.unwrap().unwrap();
        assert_eq!(stored.status, VacancyStatus::Sent);
        assert!(stored.dm_sent);
        assert_eq!(stored.llm_reply.as_deref(), Some("Здравствуйте!"));
        assert!(stored.updated_at >= record.updated_at);

        let missing = store.mark_sent(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(missing, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_searches_and_paginates_newest_first() {
        let store = MemoryVacancyStore::new();
        for i in 1..=5 {
            store
                .create(new_vacancy(i, "DevOps Engineer", Some("Acme")))
                .await
                .unwrap();
        }
        store
            .create(new_vacancy(6, "Java Developer", Some("Globex")))
            .await
            .unwrap();

        let page = store
            .list(&VacancyQuery {
                search: Some("acme".into()),
                per_page: 2,
                page: 1,
                ..VacancyQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].post_id, 5);

        let clamped = store
            .list(&VacancyQuery {
                page: 99,
                per_page: 4,
                ..VacancyQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(clamped.page, 2);
        assert_eq!(clamped.items.len(), 2);

        let sent_only = store
            .list(&VacancyQuery {
                status: Some(VacancyStatus::Sent),
                ..VacancyQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(sent_only.total, 0);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
