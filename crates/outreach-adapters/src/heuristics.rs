//! Deterministic pattern rules recovering vacancy fields from free-form post text.

use std::sync::LazyLock;

use outreach_core::{normalize_handle, same_handle, ExtractionResult, Field, FieldSource};
use regex::{Captures, Regex};

const AMOUNT: &str = r"(?:\d{1,3}(?:[ \x{A0}]\d{3})+|\d+)(?:[.,]\d+)?(?:\s?[kкKК]\b)?";
const CURRENCY: &str = r"(?:руб(?:лей|ля|\.)?|р\.|₽|rub|usd|\$|долл\w*|eur|€|евро)";

static RE_SALARY_FROM_TO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:от|from)\s*(?P<lo>{AMOUNT})\s*(?:до|to|-|–|—)\s*(?P<hi>{AMOUNT})\s*(?P<cur>{CURRENCY})?"
    ))
    .unwrap()
});
static RE_SALARY_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?P<lo>{AMOUNT})\s*(?:-|–|—)\s*(?P<hi>{AMOUNT})\s*(?P<cur>{CURRENCY})"
    ))
    .unwrap()
});
static RE_SALARY_PREFIX_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?P<cur>[$€₽])\s*(?P<lo>{AMOUNT})\s*(?:-|–|—)\s*[$€₽]?\s*(?P<hi>{AMOUNT})"
    ))
    .unwrap()
});
static RE_SALARY_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:от|from)\s*(?P<lo>{AMOUNT})\s*(?P<cur>{CURRENCY})"
    ))
    .unwrap()
});
static RE_SALARY_UP_TO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:до|up\s+to)\s*(?P<hi>{AMOUNT})\s*(?P<cur>{CURRENCY})"
    ))
    .unwrap()
});
static RE_SALARY_SINGLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?:(?P<cur>[$€₽])\s*(?P<amt>{AMOUNT})|(?P<amt2>{AMOUNT})\s*(?P<cur2>{CURRENCY}))"
    ))
    .unwrap()
});

static RE_LABEL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[^\p{L}\n]*(?P<label>\p{L}[\p{L} ]{1,28}?)[ \t]*:[ \t]*(?P<value>[^\n]+?)[ \t]*$",
    )
    .unwrap()
});
static RE_COMPANY_PROSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i:\bв[ \t]+компани[июя]\b|\bкомпания\b|\bcompany\b|\bat\b)[ \t]+[«"]?(?P<name>\p{Lu}[\p{L}\p{N}&.\-]*(?:[ \t]+\p{Lu}[\p{L}\p{N}&.\-]*){0,2})"#,
    )
    .unwrap()
});

static RE_EXPLICIT_CONTACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:контакт\w*|связь|telegram|телеграм\w*|тг|tg|пиш\w*|write(?:\s+to)?|contact\w*|отклик\w*|резюме|cv)\b(?:[^@\n]{0,20}[^\w@.\n])?@(?P<handle>[A-Za-z][A-Za-z0-9_]{4,31})\b",
    )
    .unwrap()
});
static RE_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w@.])@(?P<handle>[A-Za-z][A-Za-z0-9_]{4,31})\b").unwrap()
});
static RE_TME_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:https?://)?\b(?:t|telegram)\.me/(?P<handle>[A-Za-z][A-Za-z0-9_]{4,31})\b")
        .unwrap()
});
static RE_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap()
});
static RE_HASHTAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#[\p{L}\p{N}_]+").unwrap());

/// Path segments of `t.me` links that are not user handles.
const RESERVED_LINK_SEGMENTS: &[&str] = &["joinchat", "addlist", "share", "proxy", "socks", "iv"];

const STACK_LIMIT: usize = 4;

static STACK_VOCABULARY: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("Kubernetes", r"(?i)\b(?:kubernetes|k8s)\b"),
        ("Docker", r"(?i)\bdocker\b"),
        ("Terraform", r"(?i)\bterraform\b"),
        ("Ansible", r"(?i)\bansible\b"),
        ("Helm", r"(?i)\bhelm\b"),
        ("AWS", r"(?i)\baws\b"),
        ("GCP", r"(?i)\bgcp\b"),
        ("Azure", r"(?i)\bazure\b"),
        ("Linux", r"(?i)\blinux\b"),
        ("Prometheus", r"(?i)\bprometheus\b"),
        ("Grafana", r"(?i)\bgrafana\b"),
        ("GitLab CI", r"(?i)\bgitlab(?:[ \-]?ci)?\b"),
        ("Jenkins", r"(?i)\bjenkins\b"),
        ("ArgoCD", r"(?i)\bargo\s?cd\b"),
        ("Nginx", r"(?i)\bnginx\b"),
        ("Python", r"(?i)\bpython\b"),
        ("Go", r"\b(?i:golang)\b|\bGo\b"),
        ("Java", r"(?i)\bjava\b"),
        ("Kotlin", r"(?i)\bkotlin\b"),
        ("JavaScript", r"(?i)\bjavascript\b"),
        ("TypeScript", r"(?i)\btypescript\b"),
        ("Node.js", r"(?i)\bnode\.?js\b"),
        ("React", r"(?i)\breact\b"),
        ("Vue", r"(?i)\bvue(?:\.?js)?\b"),
        ("Rust", r"(?i)\brust\b"),
        ("C++", r"(?i)(?:^|[^\w+])c\+\+"),
        ("C#", r"(?i)\bc#"),
        ("PHP", r"(?i)\bphp\b"),
        ("PostgreSQL", r"(?i)\bpostgres(?:ql)?\b"),
        ("MySQL", r"(?i)\bmysql\b"),
        ("Redis", r"(?i)\bredis\b"),
        ("Kafka", r"(?i)\bkafka\b"),
        ("RabbitMQ", r"(?i)\brabbitmq\b"),
        ("ClickHouse", r"(?i)\bclickhouse\b"),
        ("MongoDB", r"(?i)\bmongo(?:db)?\b"),
        ("Elasticsearch", r"(?i)\belastic(?:search)?\b"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).unwrap()))
    .collect()
});

const CITIES: &[(&[&str], &str)] = &[
    (&["москв", "moscow"], "Москва"),
    (&["санкт-петербург", "петербург", "спб", "питер", "saint petersburg"], "Санкт-Петербург"),
    (&["новосибирск"], "Новосибирск"),
    (&["екатеринбург"], "Екатеринбург"),
    (&["казан", "kazan"], "Казань"),
    (&["нижний новгород", "нижнем новгороде"], "Нижний Новгород"),
    (&["минск", "minsk"], "Минск"),
    (&["алматы", "almaty"], "Алматы"),
    (&["ташкент", "tashkent"], "Ташкент"),
    (&["тбилиси", "tbilisi"], "Тбилиси"),
    (&["ереван", "yerevan"], "Ереван"),
    (&["белград", "belgrade"], "Белград"),
    (&["лимассол", "limassol"], "Лимассол"),
    (&["дубай", "dubai"], "Дубай"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Location,
    WorkFormat,
    Employment,
    Company,
}

fn classify_label(label: &str) -> Option<Label> {
    match label.trim().to_lowercase().as_str() {
        "локация" | "город" | "место" | "место работы" | "расположение" | "location" | "city" => {
            Some(Label::Location)
        }
        "формат" | "формат работы" | "format" | "work format" | "удаленка" => {
            Some(Label::WorkFormat)
        }
        "занятость" | "тип занятости" | "график" | "employment" | "schedule" => {
            Some(Label::Employment)
        }
        "компания" | "работодатель" | "company" | "employer" => Some(Label::Company),
        _ => None,
    }
}

/// Pattern-based field extractor. Holds the channel handles that must never
/// be treated as a contact.
#[derive(Debug, Clone, Default)]
pub struct HeuristicExtractor {
    excluded_handles: Vec<String>,
}

impl HeuristicExtractor {
    pub fn new<I, S>(excluded_handles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            excluded_handles: excluded_handles
                .into_iter()
                .filter_map(|h| normalize_handle(h.as_ref()))
                .collect(),
        }
    }

    pub fn is_excluded(&self, handle: &str) -> bool {
        self.excluded_handles.iter().any(|h| same_handle(h, handle))
    }

    pub fn extract(&self, text: &str) -> ExtractionResult {
        let labels = label_values(text);
        let pick = |wanted: Label| {
            labels
                .iter()
                .find(|(label, _)| *label == wanted)
                .map(|(_, value)| value.clone())
        };

        let work_format = pick(Label::WorkFormat)
            .map(|v| classify_work_format(&v).map(str::to_string).unwrap_or(v))
            .or_else(|| classify_work_format(text).map(str::to_string));
        let employment = pick(Label::Employment)
            .map(|v| classify_employment(&v).map(str::to_string).unwrap_or(v))
            .or_else(|| classify_employment(text).map(str::to_string));
        let location = pick(Label::Location).or_else(|| find_city(text).map(str::to_string));
        let company = pick(Label::Company).or_else(|| company_from_prose(text));

        let source = FieldSource::Heuristic;
        ExtractionResult {
            salary: Field::text(extract_salary(text), source),
            location: Field::text(location, source),
            work_format: Field::text(work_format, source),
            employment: Field::text(employment, source),
            company: Field::text(company, source),
            contact: Field::text(self.find_contact(text), source),
            hashtags: Field::list(hashtags(text), source),
            stack: Field::list(detect_stack(text), source),
            ..ExtractionResult::default()
        }
    }

    /// Best single contact: explicit phrasing, then a mention, then a `t.me`
    /// link, then an email address.
    pub fn find_contact(&self, text: &str) -> Option<String> {
        let allowed = |caps: &Captures<'_>| {
            normalize_handle(&caps["handle"]).filter(|handle| !self.is_excluded(handle))
        };
        RE_EXPLICIT_CONTACT
            .captures_iter(text)
            .find_map(|caps| allowed(&caps))
            .or_else(|| RE_MENTION.captures_iter(text).find_map(|caps| allowed(&caps)))
            .or_else(|| {
                RE_TME_LINK
                    .captures_iter(text)
                    .filter(|caps| !is_reserved_segment(&caps["handle"]))
                    .find_map(|caps| allowed(&caps))
            })
            .or_else(|| RE_EMAIL.find(text).map(|m| m.as_str().to_string()))
    }

    /// Every messageable handle in the post, mentions and `t.me` links in
    /// order of appearance, deduplicated case-insensitively.
    pub fn contact_handles(&self, text: &str) -> Vec<String> {
        let mut found = RE_MENTION
            .captures_iter(text)
            .filter_map(|caps| caps.name("handle"))
            .map(|m| (m.start(), m.as_str()))
            .chain(
                RE_TME_LINK
                    .captures_iter(text)
                    .filter_map(|caps| caps.name("handle"))
                    .filter(|m| !is_reserved_segment(m.as_str()))
                    .map(|m| (m.start(), m.as_str())),
            )
            .collect::<Vec<_>>();
        found.sort_by_key(|(pos, _)| *pos);

        let mut handles: Vec<String> = Vec::new();
        for (_, raw) in found {
            let Some(handle) = normalize_handle(raw) else {
                continue;
            };
            if self.is_excluded(&handle) || handles.iter().any(|h| h.eq_ignore_ascii_case(&handle)) {
                continue;
            }
            handles.push(handle);
        }
        handles
    }
}

fn is_reserved_segment(segment: &str) -> bool {
    RESERVED_LINK_SEGMENTS
        .iter()
        .any(|reserved| segment.eq_ignore_ascii_case(reserved))
}

/// Unique lowercased `#tags` in order of first appearance.
pub fn hashtags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for m in RE_HASHTAG.find_iter(text) {
        let tag = m.as_str().to_lowercase();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

pub fn extract_salary(text: &str) -> Option<String> {
    if let Some(caps) = RE_SALARY_FROM_TO
        .captures_iter(text)
        .find(|caps| caps.name("cur").is_some() || plausible_amount(&caps["lo"]))
    {
        return Some(format_range(&caps["lo"], &caps["hi"], caps.name("cur").map(|m| m.as_str())));
    }
    if let Some(caps) = RE_SALARY_RANGE.captures(text) {
        return Some(format_range(&caps["lo"], &caps["hi"], Some(&caps["cur"])));
    }
    if let Some(caps) = RE_SALARY_PREFIX_RANGE.captures(text) {
        return Some(format_range(&caps["lo"], &caps["hi"], Some(&caps["cur"])));
    }
    if let Some(caps) = RE_SALARY_FROM.captures(text) {
        return Some(format!(
            "от {} {}",
            compact_amount(&caps["lo"]),
            currency_symbol(&caps["cur"])
        ));
    }
    if let Some(caps) = RE_SALARY_UP_TO.captures(text) {
        return Some(format!(
            "до {} {}",
            compact_amount(&caps["hi"]),
            currency_symbol(&caps["cur"])
        ));
    }
    RE_SALARY_SINGLE.captures_iter(text).find_map(|caps| {
        let amount = caps.name("amt").or_else(|| caps.name("amt2"))?;
        let currency = caps.name("cur").or_else(|| caps.name("cur2"))?;
        plausible_amount(amount.as_str()).then(|| {
            format!(
                "{} {}",
                compact_amount(amount.as_str()),
                currency_symbol(currency.as_str())
            )
        })
    })
}

fn format_range(lo: &str, hi: &str, currency: Option<&str>) -> String {
    let range = format!("{} - {}", compact_amount(lo), compact_amount(hi));
    match currency {
        Some(currency) => format!("{range} {}", currency_symbol(currency)),
        None => range,
    }
}

fn compact_amount(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Rejects "от 1 до 3 лет" style numbers that are not money.
fn plausible_amount(raw: &str) -> bool {
    let digits = raw.chars().filter(char::is_ascii_digit).count();
    let thousands = raw
        .chars()
        .last()
        .is_some_and(|c| matches!(c, 'k' | 'K' | 'к' | 'К'));
    digits >= 3 || thousands
}

fn currency_symbol(raw: &str) -> &'static str {
    let lower = raw.to_lowercase();
    if lower.starts_with("usd") || lower.starts_with('$') || lower.starts_with("долл") {
        "$"
    } else if lower.starts_with("eur") || lower.starts_with('€') || lower.starts_with("евро") {
        "€"
    } else {
        "₽"
    }
}

fn label_values(text: &str) -> Vec<(Label, String)> {
    RE_LABEL_LINE
        .captures_iter(text)
        .filter_map(|caps| {
            let label = classify_label(&caps["label"])?;
            let value = caps["value"].trim().trim_end_matches(['.', ',', ';']).trim();
            (!value.is_empty()).then(|| (label, value.to_string()))
        })
        .collect()
}

fn classify_work_format(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    if lower.contains("гибрид") || lower.contains("hybrid") {
        Some("Гибрид")
    } else if ["удален", "удалён", "remote", "дистанц"]
        .iter()
        .any(|k| lower.contains(k))
    {
        Some("Удалённо")
    } else if ["офис", "office", "onsite", "on-site"]
        .iter()
        .any(|k| lower.contains(k))
    {
        Some("Офис")
    } else {
        None
    }
}

fn classify_employment(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    if ["полная", "full-time", "full time", "fulltime"]
        .iter()
        .any(|k| lower.contains(k))
    {
        Some("Полная занятость")
    } else if ["частичная", "part-time", "part time", "parttime"]
        .iter()
        .any(|k| lower.contains(k))
    {
        Some("Частичная занятость")
    } else if ["проектная", "проектн", "project-based", "contract"]
        .iter()
        .any(|k| lower.contains(k))
    {
        Some("Проектная работа")
    } else if lower.contains("стажир") || lower.contains("internship") {
        Some("Стажировка")
    } else {
        None
    }
}

fn find_city(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    CITIES
        .iter()
        .find(|(stems, _)| stems.iter().any(|stem| lower.contains(stem)))
        .map(|(_, city)| *city)
}

fn company_from_prose(text: &str) -> Option<String> {
    RE_COMPANY_PROSE.captures(text).and_then(|caps| {
        let name = caps["name"].trim_end_matches(['.', '-']).trim();
        (!name.is_empty()).then(|| name.to_string())
    })
}

fn detect_stack(text: &str) -> Vec<String> {
    let mut hits = STACK_VOCABULARY
        .iter()
        .filter_map(|(name, re)| re.find(text).map(|m| (m.start(), *name)))
        .collect::<Vec<_>>();
    hits.sort_by_key(|(pos, _)| *pos);
    hits.into_iter()
        .take(STACK_LIMIT)
        .map(|(_, name)| name.to_string())
        .collect()
}
