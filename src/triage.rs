//! Heuristic scoring and text helpers over stored messages.
//!
//! Everything here is pure: no network, no store access.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::Message;

pub const MAX_SCORE: f64 = 10.0;
pub const SUMMARY_WORDS: usize = 30;

const SUBJECT_KEYWORDS: &[&str] = &["urgent", "action", "important"];
const SPAM_KEYWORDS: &[&str] = &["win", "free", "offer", "click"];
const HAM_KEYWORDS: &[&str] = &["meeting", "schedule", "project"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Sender fragments worth a flat boost, matched case-insensitively.
    #[serde(default = "default_important_senders")]
    pub important_senders: Vec<String>,
    #[serde(default = "default_internal_domain")]
    pub internal_domain: String,
}

fn default_important_senders() -> Vec<String> {
    vec!["boss@company.com".into(), "hr@company.com".into()]
}

fn default_internal_domain() -> String {
    "company.com".into()
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            important_senders: default_important_senders(),
            internal_domain: default_internal_domain(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Spam,
    Important,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spam => "spam",
            Self::Important => "important",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeCategory {
    /// Under 24 hours.
    New,
    /// Under 72 hours.
    Recent,
    Old,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Nepali,
}

fn word_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\w+").expect("valid word regex"))
}

fn email_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"[\w.-]+@[\w.-]+").expect("valid email regex"))
}

fn url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"https?://\S+").expect("valid URL regex"))
}

fn phone_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\+?\d[\d -]{8,}\d").expect("valid phone regex"))
}

fn thread_prefix_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?i)^(re:|fwd:)\s*").expect("valid prefix regex"))
}

pub fn word_count(text: &str) -> usize {
    word_regex().find_iter(text).count()
}

/// Total occurrences of `keywords` among the words of `text`, ignoring case.
pub fn keyword_frequency(text: &str, keywords: &[&str]) -> usize {
    let words: Vec<String> = word_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    keywords
        .iter()
        .map(|k| {
            let k = k.to_lowercase();
            words.iter().filter(|w| **w == k).count()
        })
        .sum()
}

/// Additive score in `[0, 10]`: body length (up to 5), an important-sender
/// boost (5), and 2 per priority keyword in the subject.
pub fn priority_score(message: &Message, config: &TriageConfig) -> f64 {
    let length = (word_count(&message.body_text) as f64 / 50.0).min(5.0);

    let sender = message.sender.to_lowercase();
    let important = config
        .important_senders
        .iter()
        .any(|s| sender.contains(&s.to_lowercase()));
    let sender_boost = if important { 5.0 } else { 0.0 };

    let keywords = 2.0 * keyword_frequency(&message.subject, SUBJECT_KEYWORDS) as f64;

    (length + sender_boost + keywords).min(MAX_SCORE)
}

/// Spam only when spam indicators strictly outnumber ham indicators.
pub fn classify(body: &str) -> Classification {
    let spam = keyword_frequency(body, SPAM_KEYWORDS);
    let ham = keyword_frequency(body, HAM_KEYWORDS);
    if spam > ham {
        Classification::Spam
    } else {
        Classification::Important
    }
}

/// Messages paired with their score, highest first. Ties keep input order.
pub fn rank<'a>(messages: &'a [Message], config: &TriageConfig) -> Vec<(&'a Message, f64)> {
    rank_by(messages.iter().collect(), |m| priority_score(m, config))
}

/// Stable descending sort of `items` by `score`.
pub fn rank_by<T>(items: Vec<T>, score: impl Fn(&T) -> f64) -> Vec<(T, f64)> {
    let mut scored: Vec<(T, f64)> = items
        .into_iter()
        .map(|item| {
            let s = score(&item);
            (item, s)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored
}

/// First 30 whitespace-separated words, with `...` when more were cut.
pub fn summarize(body: &str) -> String {
    let words: Vec<&str> = body.split_whitespace().collect();
    let mut summary = words
        .iter()
        .take(SUMMARY_WORDS)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if words.len() > SUMMARY_WORDS {
        summary.push_str("...");
    }
    summary
}

pub fn extract_emails(text: &str) -> Vec<String> {
    collect_matches(email_regex(), text)
}

pub fn extract_urls(text: &str) -> Vec<String> {
    collect_matches(url_regex(), text)
}

pub fn extract_phone_numbers(text: &str) -> Vec<String> {
    collect_matches(phone_regex(), text)
}

fn collect_matches(re: &Regex, text: &str) -> Vec<String> {
    re.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

/// Strip one leading `Re:` or `Fwd:` and surrounding whitespace.
///
/// Only a single prefix is removed: `"Re: Re: Budget"` becomes `"Re: Budget"`.
pub fn thread_subject(subject: &str) -> String {
    thread_prefix_regex()
        .replace(subject, "")
        .trim()
        .to_string()
}

pub fn is_reply(subject: &str) -> bool {
    subject.to_lowercase().starts_with("re:")
}

pub fn is_forward(subject: &str) -> bool {
    subject.to_lowercase().starts_with("fwd:")
}

/// Whether the sender's domain falls under `domain` (subdomains included).
pub fn is_internal(sender: &str, domain: &str) -> bool {
    let sender_domain = sender.rsplit('@').next().unwrap_or_default();
    sender_domain
        .trim_end_matches('>')
        .to_lowercase()
        .ends_with(&domain.to_lowercase())
}

pub fn age_category(received_at: DateTime<Utc>, now: DateTime<Utc>) -> AgeCategory {
    let hours = (now - received_at).num_seconds() as f64 / 3600.0;
    if hours < 24.0 {
        AgeCategory::New
    } else if hours < 72.0 {
        AgeCategory::Recent
    } else {
        AgeCategory::Old
    }
}

/// Devanagari script means Nepali; anything else is treated as English.
pub fn detect_language(text: &str) -> Language {
    if text.chars().any(|c| ('\u{0900}'..='\u{097F}').contains(&c)) {
        Language::Nepali
    } else {
        Language::English
    }
}
