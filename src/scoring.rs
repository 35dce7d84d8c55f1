use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::data_models::{CRAWL_ERROR_MARKER, CrawledResult};
use crate::error::{Result, SearchError};
use crate::extractor::{MARK_CLOSE, MARK_OPEN, query_terms};

/// Substrings that identify content produced by a failed crawl.
pub const CRAWL_ERROR_MARKERS: &[&str] = &[CRAWL_ERROR_MARKER, "Error fetching content:"];

static SENTENCE_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+").expect("static pattern must compile"));

#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceWeights {
    pub exact_phrase: f64,
    pub word_occurrence: f64,
    pub title_phrase: f64,
    pub title_word: f64,
    pub recent_30_days: f64,
    pub recent_90_days: f64,
    pub recent_365_days: f64,
    pub short_content_penalty: f64,
    pub long_content_bonus: f64,
    pub short_content_chars: usize,
    pub long_content_chars: usize,
    pub highlight: f64,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        RelevanceWeights {
            exact_phrase: 30.0,
            word_occurrence: 3.0,
            title_phrase: 20.0,
            title_word: 10.0,
            recent_30_days: 15.0,
            recent_90_days: 10.0,
            recent_365_days: 5.0,
            short_content_penalty: -10.0,
            long_content_bonus: 5.0,
            short_content_chars: 200,
            long_content_chars: 1000,
            highlight: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityThresholds {
    /// Content needs strictly more words than this.
    pub min_words: usize,
    /// Content needs strictly more sentence pieces than this.
    pub min_sentences: usize,
    /// Exclusive bounds on the average words per sentence.
    pub min_words_per_sentence: f64,
    pub max_words_per_sentence: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        QualityThresholds {
            min_words: 50,
            min_sentences: 3,
            min_words_per_sentence: 5.0,
            max_words_per_sentence: 30.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelevanceScorer {
    pub weights: RelevanceWeights,
    pub quality: QualityThresholds,
}

impl RelevanceScorer {
    pub fn new(weights: RelevanceWeights, quality: QualityThresholds) -> Self {
        Self { weights, quality }
    }

    /// Score a crawled result; any internal failure scores 0.
    pub fn score(&self, result: &CrawledResult, query: &str, now: DateTime<Utc>) -> f64 {
        match self.try_score(result, query, now) {
            Ok(score) => score,
            Err(e) => {
                tracing::warn!(url = %result.raw.url, error = %e, "scoring failed");
                0.0
            }
        }
    }

    fn try_score(&self, result: &CrawledResult, query: &str, now: DateTime<Utc>) -> Result<f64> {
        let w = &self.weights;
        let plain = strip_marks(&result.extracted_content);
        let content = plain.to_lowercase();
        let title = result.raw.title.to_lowercase();
        let phrase = query.trim().to_lowercase();
        let words = query_terms(query);

        let mut score = 0.0;

        if !phrase.is_empty() && content.contains(&phrase) {
            score += w.exact_phrase;
        }
        for word in &words {
            let re = whole_word(word)?;
            score += re.find_iter(&content).count() as f64 * w.word_occurrence;
        }

        if !phrase.is_empty() && title.contains(&phrase) {
            score += w.title_phrase;
        }
        for word in &words {
            if whole_word(word)?.is_match(&title) {
                score += w.title_word;
            }
        }

        if let Some(published) = result.published_date {
            let days = (now - published).num_seconds() as f64 / 86_400.0;
            if days < 30.0 {
                score += w.recent_30_days;
            } else if days < 90.0 {
                score += w.recent_90_days;
            } else if days < 365.0 {
                score += w.recent_365_days;
            }
        }

        let length = plain.chars().count();
        if length < w.short_content_chars {
            score += w.short_content_penalty;
        } else if length > w.long_content_chars {
            score += w.long_content_bonus;
        }

        score += result.extracted_content.matches(MARK_OPEN).count() as f64 * w.highlight;

        Ok(score)
    }

    /// Whether crawled content is worth scoring at all.
    pub fn is_quality_content(&self, text: &str) -> bool {
        if CRAWL_ERROR_MARKERS.iter().any(|marker| text.contains(marker)) {
            return false;
        }
        let words = text.split_whitespace().count();
        let sentences = SENTENCE_SPLIT.split(text).count();
        if sentences == 0 {
            return false;
        }
        let per_sentence = words as f64 / sentences as f64;

        words > self.quality.min_words
            && sentences > self.quality.min_sentences
            && per_sentence > self.quality.min_words_per_sentence
            && per_sentence < self.quality.max_words_per_sentence
    }
}

fn whole_word(word: &str) -> Result<Regex> {
    Regex::new(&format!(r"\b{}\b", regex::escape(word)))
        .map_err(|e| SearchError::Parse(format!("bad term pattern for {word:?}: {e}")))
}

fn strip_marks(text: &str) -> String {
    text.replace(MARK_OPEN, "").replace(MARK_CLOSE, "")
}

/// Drop results under `min_score`, sort the rest by descending score (ties
/// keep their incoming order) and keep at most `max_results`.
pub fn rank(mut results: Vec<CrawledResult>, min_score: f64, max_results: usize) -> Vec<CrawledResult> {
    results.retain(|r| r.relevance_score >= min_score);
    results.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    results.truncate(max_results);
    results
}
