//! Keyword extraction and relevance scoring for `buildlog_suggest`.

use std::sync::LazyLock;

use regex::Regex;

use crate::client::SearchResult;

pub const SUGGESTION_LIMIT: usize = 3;
pub const SUGGEST_SEARCH_LIMIT: u64 = 10;

const KEYWORD_MATCH_SCORE: f64 = 10.0;
const STEP_COUNT_WEIGHT: f64 = 0.5;
const STEP_COUNT_SCORE_CAP: f64 = 20.0;

static KEYWORD_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // frameworks and libraries
        r"(?i)\b(next\.?js|react|vue|svelte|angular|express|fastapi|django|rails|flask|nestjs|remix|astro)\b",
        // integrations
        r"(?i)\b(stripe|auth0?|clerk|supabase|firebase|prisma|drizzle|mongodb|postgres|redis|oauth|jwt)\b",
        // action verbs
        r"(?i)\b(add|create|build|implement|fix|refactor|migrate|deploy|test|setup|configure|integrate)\b",
        // technologies
        r"(?i)\b(api|rest|graphql|websocket|database|authentication|auth|payment|upload|email|notification)\b",
        // languages
        r"(?i)\b(typescript|javascript|python|rust|go|java|ruby|php)\b",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("valid keyword regex"))
    .collect()
});

/// Lower-cased known keywords in first-seen order, without duplicates.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for pattern in KEYWORD_PATTERNS.iter() {
        for found in pattern.find_iter(text) {
            let keyword = found.as_str().to_lowercase();
            if !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
    }
    keywords
}

/// (file extension, language, bonus) pairs for context-file matching.
const EXTENSION_BONUSES: [(&[&str], &str, f64); 3] = [
    (&["ts", "tsx"], "typescript", 15.0),
    (&["py"], "python", 15.0),
    (&["js"], "javascript", 10.0),
];

pub fn relevance_score(result: &SearchResult, keywords: &[String], context_files: &[String]) -> f64 {
    let mut score = 0.0;

    let haystack = format!(
        "{} {} {}",
        result.title,
        result.description.as_deref().unwrap_or_default(),
        result.tags.as_deref().unwrap_or_default().join(" ")
    )
    .to_lowercase();
    for keyword in keywords {
        if haystack.contains(keyword.as_str()) {
            score += KEYWORD_MATCH_SCORE;
        }
    }

    if !context_files.is_empty() {
        let extensions: Vec<String> = context_files
            .iter()
            .filter_map(|file| file.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()))
            .collect();
        let language = result.language.as_deref().map(str::to_lowercase);
        for (exts, lang, bonus) in EXTENSION_BONUSES {
            let has_extension = extensions.iter().any(|ext| exts.contains(&ext.as_str()));
            if has_extension && language.as_deref() == Some(lang) {
                score += bonus;
            }
        }
    }

    score + (result.step_count as f64 * STEP_COUNT_WEIGHT).min(STEP_COUNT_SCORE_CAP)
}

/// Scores every result and returns them best first. Ties keep search order.
pub fn rank<'a>(
    results: &'a [SearchResult],
    keywords: &[String],
    context_files: &[String],
) -> Vec<(&'a SearchResult, f64)> {
    let mut ranked: Vec<(&SearchResult, f64)> = results
        .iter()
        .map(|result| (result, relevance_score(result, keywords, context_files)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(title: &str, language: Option<&str>, step_count: u64) -> SearchResult {
        SearchResult {
            slug: title.to_lowercase().replace(' ', "-"),
            title: title.to_string(),
            language: language.map(str::to_string),
            step_count,
            ..SearchResult::default()
        }
    }

    #[test]
    fn keywords_are_grouped_lowercased_and_deduplicated() {
        let keywords =
            extract_keywords("Add Stripe subscription checkout to Next.js app, then add tests in TypeScript");
        assert_eq!(keywords, vec!["next.js", "stripe", "add", "typescript"]);
        assert!(extract_keywords("nothing relevant here").is_empty());
    }

    #[test]
    fn keyword_matching_requires_word_boundaries() {
        // "rusty" and "testing" are not keywords.
        assert!(extract_keywords("rusty testing").is_empty());
        assert_eq!(extract_keywords("build a REST api"), vec!["build", "rest", "api"]);
    }

    #[test]
    fn score_combines_keywords_context_and_step_count() {
        let mut r = result("Stripe checkout for Next.js", Some("TypeScript"), 10);
        r.tags = Some(vec!["payments".to_string()]);
        let keywords = vec!["stripe".to_string(), "next.js".to_string(), "vue".to_string()];

        assert_eq!(relevance_score(&r, &keywords, &[]), 20.0 + 5.0);
        let files = vec!["app/page.tsx".to_string(), "README".to_string()];
        assert_eq!(relevance_score(&r, &keywords, &files), 20.0 + 15.0 + 5.0);
    }

    #[test]
    fn step_count_contribution_is_capped() {
        let r = result("Huge", None, 500);
        assert_eq!(relevance_score(&r, &[], &[]), 20.0);
    }

    #[test]
    fn rank_orders_by_score_and_keeps_ties_stable() {
        let results = vec![
            result("First", None, 2),
            result("Auth flow", None, 2),
            result("Second", None, 2),
        ];
        let keywords = vec!["auth".to_string()];
        let ranked = rank(&results, &keywords, &[]);
        let titles: Vec<&str> = ranked.iter().map(|(r, _)| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Auth flow", "First", "Second"]);
    }
}
