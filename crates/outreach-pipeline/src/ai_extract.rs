use std::sync::Arc;

use outreach_adapters::text_service::{clean_model_output, truncate_chars};
use outreach_adapters::{GenerationParams, TextService};
use outreach_core::{normalize_handle, ExtractionResult, Field, FieldSource};
use serde::Deserialize;
use tracing::{debug, warn};

/// Longest post prefix sent for extraction.
pub const MAX_INPUT_CHARS: usize = 4000;

const INSTRUCTION: &str = "Извлеки из текста вакансии поля и верни только JSON-объект без пояснений и разметки. \
Ключи: position, company, salary, location, work_format, employment, contact (строка или null), \
stack, tasks (массивы строк), summary (одно-два предложения или null). \
Не придумывай значения, которых нет в тексте.";

#[derive(Debug, Deserialize)]
struct AiFields {
    #[serde(default)]
    position: Option<String>,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    salary: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default, alias = "workFormat")]
    work_format: Option<String>,
    #[serde(default)]
    employment: Option<String>,
    #[serde(default)]
    contact: Option<String>,
    #[serde(default)]
    stack: Option<Vec<String>>,
    #[serde(default)]
    tasks: Option<Vec<String>>,
    #[serde(default)]
    summary: Option<String>,
}

impl AiFields {
    fn into_result(self) -> ExtractionResult {
        let source = FieldSource::Ai;
        ExtractionResult {
            position: Field::text(self.position, source),
            company: Field::text(self.company, source),
            salary: Field::text(self.salary, source),
            location: Field::text(self.location, source),
            work_format: Field::text(self.work_format, source),
            employment: Field::text(self.employment, source),
            contact: Field::text(self.contact.as_deref().and_then(normalize_contact), source),
            hashtags: Field::empty(),
            stack: Field::list(dedupe(self.stack.unwrap_or_default()), source),
            tasks: Field::list(self.tasks.unwrap_or_default(), source),
            summary: Field::text(self.summary, source),
        }
    }
}

fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.iter().any(|seen| seen.eq_ignore_ascii_case(item.trim())) {
            out.push(item.trim().to_string());
        }
    }
    out
}

/// Emails pass through, anything else must be a single handle-shaped token.
fn normalize_contact(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.contains(char::is_whitespace) {
        return None;
    }
    if !raw.starts_with('@') && raw.contains('@') && raw.contains('.') {
        return Some(raw.to_string());
    }
    normalize_handle(raw)
}

fn has_any_field(result: &ExtractionResult) -> bool {
    [
        &result.position,
        &result.company,
        &result.salary,
        &result.location,
        &result.work_format,
        &result.employment,
        &result.contact,
        &result.summary,
    ]
    .iter()
    .any(|f| f.is_present())
        || result.stack.is_present()
        || result.tasks.is_present()
}

/// Strict parse of a model answer: a JSON object with the expected field
/// types, or nothing.
pub fn parse_fields(raw: &str) -> Option<ExtractionResult> {
    let cleaned = clean_model_output(raw);
    let value = match serde_json::from_str::<serde_json::Value>(&cleaned) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        Ok(_) => {
            debug!("discarding extraction payload that is not a JSON object");
            return None;
        }
        Err(err) => {
            debug!(error = %err, "discarding malformed extraction payload");
            return None;
        }
    };
    match serde_json::from_value::<AiFields>(value) {
        Ok(fields) => Some(fields.into_result()).filter(has_any_field),
        Err(err) => {
            debug!(error = %err, "discarding extraction payload with unexpected field types");
            None
        }
    }
}

/// Remote field extraction. Every failure collapses to `None`.
#[derive(Clone)]
pub struct AiFieldExtractor {
    service: Arc<dyn TextService>,
    params: GenerationParams,
}

impl AiFieldExtractor {
    pub fn new(service: Arc<dyn TextService>, params: GenerationParams) -> Self {
        Self { service, params }
    }

    pub fn prompt(text: &str) -> String {
        format!(
            "{INSTRUCTION}\n\nТекст вакансии:\n---\n{}\n---",
            truncate_chars(text, MAX_INPUT_CHARS)
        )
    }

    pub async fn extract(&self, text: &str) -> Option<ExtractionResult> {
        match self.service.generate(&Self::prompt(text), self.params).await {
            Ok(raw) => parse_fields(&raw),
            Err(err) => {
                warn!(error = %err, "AI extraction unavailable, using heuristics only");
                None
            }
        }
    }
}
