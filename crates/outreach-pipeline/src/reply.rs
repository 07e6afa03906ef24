//! Outbound message synthesis: a generated reply when the text service
//! answers with something usable, a deterministic template otherwise.

use std::sync::Arc;

use outreach_adapters::text_service::truncate_chars;
use outreach_adapters::{GenerationParams, TextService};
use outreach_core::{normalize_handle, VacancyFields, PLACEHOLDER_POSITION};
use tracing::{debug, warn};

/// Generated replies shorter than this are treated as failures.
pub const MIN_REPLY_CHARS: usize = 40;
const EXCERPT_CHARS: usize = 1200;
const TEMPLATE_STACK_ITEMS: usize = 3;

const NATIVE_NAMES: &[(&str, &str)] = &[
    ("aleksandr", "Александр"),
    ("alexander", "Александр"),
    ("alexandra", "Александра"),
    ("alexey", "Алексей"),
    ("aleksey", "Алексей"),
    ("alena", "Алёна"),
    ("anastasia", "Анастасия"),
    ("andrey", "Андрей"),
    ("anna", "Анна"),
    ("artem", "Артём"),
    ("daria", "Дарья"),
    ("darya", "Дарья"),
    ("dmitry", "Дмитрий"),
    ("dmitriy", "Дмитрий"),
    ("ekaterina", "Екатерина"),
    ("elena", "Елена"),
    ("evgeniy", "Евгений"),
    ("irina", "Ирина"),
    ("ivan", "Иван"),
    ("julia", "Юлия"),
    ("kirill", "Кирилл"),
    ("ksenia", "Ксения"),
    ("maria", "Мария"),
    ("maxim", "Максим"),
    ("mikhail", "Михаил"),
    ("natalia", "Наталья"),
    ("nikita", "Никита"),
    ("olga", "Ольга"),
    ("pavel", "Павел"),
    ("polina", "Полина"),
    ("sergey", "Сергей"),
    ("svetlana", "Светлана"),
    ("tatiana", "Татьяна"),
    ("victoria", "Виктория"),
    ("yulia", "Юлия"),
];

const ORGANIZATION_MARKERS: &[&str] = &[
    "hr", "jobs", "job", "team", "career", "careers", "recruit", "recruiting", "talent", "hiring",
    "company", "group", "tech", "soft", "lab", "labs", "studio", "bank", "it", "dev", "official",
];

/// Inputs the synthesizer reads from a persisted vacancy.
#[derive(Debug, Clone, Copy)]
pub struct ReplyContext<'a> {
    pub contact: Option<&'a str>,
    pub fields: &'a VacancyFields,
    pub raw_text: &'a str,
}

#[derive(Clone)]
pub struct ReplySynthesizer {
    service: Option<Arc<dyn TextService>>,
    params: GenerationParams,
    candidate_profile: Option<String>,
}

impl ReplySynthesizer {
    pub fn new(
        service: Option<Arc<dyn TextService>>,
        params: GenerationParams,
        candidate_profile: Option<String>,
    ) -> Self {
        Self {
            service,
            params,
            candidate_profile,
        }
    }

    pub fn template_only() -> Self {
        Self::new(None, GenerationParams::default(), None)
    }

    /// Generated reply, else the template, else `None`. Never fails.
    pub async fn synthesize(&self, ctx: ReplyContext<'_>) -> Option<String> {
        if let Some(service) = &self.service {
            match service.generate(&self.prompt(ctx), self.params).await {
                Ok(reply) if reply.chars().count() >= MIN_REPLY_CHARS => return Some(reply),
                Ok(reply) => {
                    debug!(chars = reply.chars().count(), "generated reply too short, using template")
                }
                Err(err) => warn!(error = %err, "reply generation failed, using template"),
            }
        }
        template_reply(ctx)
    }

    pub fn prompt(&self, ctx: ReplyContext<'_>) -> String {
        let fields = ctx.fields;
        let mut lines = vec![
            "Напиши короткое (до 600 символов) вежливое личное сообщение рекрутеру в Telegram \
             с откликом на вакансию. Без шаблонных заглушек, без подписи, на русском языке."
                .to_string(),
        ];
        let mut push = |label: &str, value: Option<&str>| {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                lines.push(format!("{label}: {value}"));
            }
        };
        push("Контакт", ctx.contact);
        push("Позиция", fields.position.as_deref());
        push("Компания", fields.company.as_deref());
        push("Формат", fields.work_format.as_deref());
        push("Локация", fields.location.as_deref());
        push("Зарплата", fields.salary.as_deref());
        let stack = fields.stack.join(", ");
        push("Стек", Some(stack.as_str()));
        if let Some(profile) = self.candidate_profile.as_deref() {
            lines.push(format!("Профиль кандидата: {profile}"));
        }
        lines.push(format!(
            "Текст вакансии:\n{}",
            truncate_chars(ctx.raw_text, EXCERPT_CHARS)
        ));
        lines.join("\n")
    }
}

/// Deterministic reply: greeting, one sentence about the role, a closing question.
pub fn template_reply(ctx: ReplyContext<'_>) -> Option<String> {
    let fields = ctx.fields;
    let position = fields
        .position
        .as_deref()
        .filter(|p| !p.trim().is_empty());
    let company = fields.company.as_deref().filter(|c| !c.trim().is_empty());
    if position.is_none() && company.is_none() {
        return None;
    }

    let greeting = match ctx.contact.and_then(|c| first_name(c, company)) {
        Some(name) => format!("Здравствуйте, {name}!"),
        None => "Здравствуйте!".to_string(),
    };

    let role = match position {
        Some(p) if p != PLACEHOLDER_POSITION => format!("позиция «{p}»"),
        Some(p) => format!("ваша вакансия «{p}»"),
        None => "ваша вакансия".to_string(),
    };
    let mut sentence = format!("Меня заинтересовала {role}");
    if let Some(company) = company {
        sentence.push_str(&format!(" в компании {company}"));
    }
    let stack = fields
        .stack
        .iter()
        .take(TEMPLATE_STACK_ITEMS)
        .cloned()
        .collect::<Vec<_>>();
    if stack.is_empty() {
        sentence.push('.');
    } else {
        sentence.push_str(&format!(", у меня есть опыт с {}.", stack.join(", ")));
    }

    Some(format!(
        "{greeting} {sentence} Подскажите, вакансия ещё актуальна?"
    ))
}

/// Native first name recovered from a contact handle, unless the handle reads
/// like an organization.
fn first_name(contact: &str, company: Option<&str>) -> Option<&'static str> {
    let handle = normalize_handle(contact)?.trim_start_matches('@').to_ascii_lowercase();
    if let Some(company) = company {
        let company = company.to_lowercase();
        let company = company.trim();
        if company.chars().count() >= 3 && handle.contains(company) {
            return None;
        }
    }
    let first = handle
        .split(|c: char| c == '_' || c.is_ascii_digit())
        .find(|token| !token.is_empty())?;
    if ORGANIZATION_MARKERS.contains(&first) {
        return None;
    }
    NATIVE_NAMES
        .iter()
        .find(|(latin, _)| *latin == first)
        .map(|(_, native)| *native)
}

const GREETINGS: &[&str] = &["Здравствуйте", "Добрый день", "Добрый вечер", "Привет", "Hello", "Hi"];

/// Drops a name from an opening greeting: "Здравствуйте, Анна! ..." becomes
/// "Здравствуйте! ...". Other texts are returned unchanged.
pub fn impersonal_greeting(text: &str) -> String {
    for greeting in GREETINGS {
        let Some(rest) = text.strip_prefix(greeting) else {
            continue;
        };
        let Some(named) = rest.strip_prefix(", ") else {
            continue;
        };
        let Some(end) = named.find(['!', ',', '.']) else {
            continue;
        };
        let name = &named[..end];
        let is_name = !name.is_empty()
            && name.chars().count() <= 30
            && name.split(' ').count() <= 2
            && name.chars().next().is_some_and(char::is_uppercase);
        if is_name {
            let tail = named[end + 1..].trim_start();
            return if tail.is_empty() {
                format!("{greeting}!")
            } else {
                format!("{greeting}! {tail}")
            };
        }
    }
    text.to_string()
}

/// Static configured template with `{position}` / `{company}` placeholders.
pub fn render_static_template(template: &str, fields: &VacancyFields) -> Option<String> {
    let rendered = template
        .replace("{position}", fields.position.as_deref().unwrap_or(PLACEHOLDER_POSITION))
        .replace("{company}", fields.company.as_deref().unwrap_or_default())
        .trim()
        .to_string();
    (!rendered.is_empty()).then_some(rendered)
}
