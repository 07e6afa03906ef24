use std::collections::HashSet;

use outreach_adapters::heuristics::hashtags;

/// Hashtag-equality filter. An empty keyword set lets every post through.
#[derive(Debug, Clone, Default)]
pub struct RelevanceFilter {
    keywords: HashSet<String>,
}

impl RelevanceFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().trim_start_matches('#').to_lowercase())
            .filter(|k| !k.is_empty())
            .map(|k| format!("#{k}"))
            .collect();
        Self { keywords }
    }

    pub fn is_open(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn is_relevant(&self, text: &str) -> bool {
        self.is_open() || hashtags(text).iter().any(|tag| self.keywords.contains(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_on_hashtag_equality_only() {
        let filter = RelevanceFilter::new(["devops"]);
        assert!(filter.is_relevant("Вакансия #devops #senior"));
        assert!(filter.is_relevant("#DevOps инженер"));
        assert!(!filter.is_relevant("#java разработчик"));
        assert!(!filter.is_relevant("devops без тегов"));
        assert!(!filter.is_relevant("#devopsengineer"));
    }

    #[test]
    fn empty_keyword_set_is_open() {
        let filter = RelevanceFilter::new(Vec::<String>::new());
        assert!(filter.is_open());
        assert!(filter.is_relevant("#java"));
        assert!(filter.is_relevant("no tags at all"));
        assert!(RelevanceFilter::new([" ", "#"]).is_open());
    }
}
