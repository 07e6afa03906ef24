use outreach_core::{
    normalize_handle, ExtractionResult, Field, FieldSource, PLACEHOLDER_POSITION,
};

/// Combine the heuristic floor with an optional AI result.
///
/// Present AI values win field by field and heuristics fill the gaps. Without
/// an AI result the heuristic fields are taken as-is, `position` falls back to
/// the placeholder and `tasks`/`summary` stay empty. The contact prefers an
/// author hint that is not an excluded channel handle.
pub fn merge_fields<F>(
    heuristic: ExtractionResult,
    ai: Option<ExtractionResult>,
    author_hint: Option<&str>,
    is_excluded: F,
) -> ExtractionResult
where
    F: Fn(&str) -> bool,
{
    let ai = ai.unwrap_or_default();
    let placeholder = Field::with_source(PLACEHOLDER_POSITION.to_string(), FieldSource::Placeholder);

    let text_contact = ai
        .contact
        .clone()
        .filter_present(|c| !is_excluded(c))
        .or(heuristic.contact.clone().filter_present(|c| !is_excluded(c)));

    ExtractionResult {
        position: ai.position.or(placeholder),
        company: ai.company.or(heuristic.company),
        salary: ai.salary.or(heuristic.salary),
        location: ai.location.or(heuristic.location),
        work_format: ai.work_format.or(heuristic.work_format),
        employment: ai.employment.or(heuristic.employment),
        contact: resolve_contact(author_hint, text_contact, &is_excluded),
        hashtags: heuristic.hashtags.or(ai.hashtags),
        stack: ai.stack.or(heuristic.stack),
        tasks: ai.tasks,
        summary: ai.summary,
    }
}

/// Author identity first, unless it is one of the excluded channel handles.
pub fn resolve_contact<F>(
    author_hint: Option<&str>,
    text_contact: Field<String>,
    is_excluded: &F,
) -> Field<String>
where
    F: Fn(&str) -> bool,
{
    let author = author_hint
        .and_then(normalize_handle)
        .filter(|handle| !is_excluded(handle));
    Field::maybe(author, FieldSource::AuthorHint).or(text_contact)
}

trait FilterPresent<T> {
    fn filter_present(self, keep: impl Fn(&T) -> bool) -> Self;
}

impl<T> FilterPresent<T> for Field<T> {
    fn filter_present(self, keep: impl Fn(&T) -> bool) -> Self {
        match &self.value {
            Some(value) if !keep(value) => Field::empty(),
            _ => self,
        }
    }
}
