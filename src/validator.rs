use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::models::{ProcessedReview, ValidationFlag};
use crate::nlp::LanguageDetector;

pub const MIN_LENGTH: usize = 10;
pub const MAX_LENGTH: usize = 1000;

fn spam_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // promotional phrases
            r"(?i)\b(?:click here|buy now|limited offer)\b",
            // links
            r"(?i)\b(?:https?://|www\.|bit\.ly|tinyurl\.com)\S+",
            // phone numbers
            r"\b(?:\+?\d{1,3}[-. (]?)?\d{3}[-. )]?\d{3}[-. ]?\d{4}\b",
            // disposable or free mail addresses
            r"(?i)\b[A-Z0-9._%+-]+@(?:gmail|yahoo|hotmail|tempmail|mailinator)\.(?:com|net)\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    })
}

/// Collapse whitespace runs to one space and drop control characters.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn is_spam(text: &str) -> bool {
    spam_patterns().iter().any(|re| re.is_match(text))
}

fn content_hash(text: &str) -> [u8; 32] {
    Sha256::digest(text.to_lowercase().as_bytes()).into()
}

/// Applies the validation rules to reviews of one firm. Flags accumulate;
/// only hard flags make a review invalid.
pub struct Validator {
    language: Arc<dyn LanguageDetector>,
    primary_language: String,
    seen: HashSet<[u8; 32]>,
}

impl Validator {
    pub fn new(language: Arc<dyn LanguageDetector>, primary_language: impl Into<String>) -> Self {
        Self {
            language,
            primary_language: primary_language.into(),
            seen: HashSet::new(),
        }
    }

    /// Forget the duplicate hashes of the previous firm.
    pub fn reset(&mut self) {
        self.seen.clear();
    }

    pub fn validate(&mut self, review: &mut ProcessedReview) {
        review.content = clean_text(&review.content);
        review.validation_flags.clear();

        let text = review.content.as_str();
        let flags = &mut review.validation_flags;

        if text.is_empty() {
            flags.insert(ValidationFlag::MissingText);
            review.language = None;
            review.is_valid = false;
            debug!(review_id = %review.review_id, "Review has no content");
            return;
        }

        let length = text.chars().count();
        if length < MIN_LENGTH {
            flags.insert(ValidationFlag::TooShort);
        } else if length > MAX_LENGTH {
            flags.insert(ValidationFlag::TooLong);
        }

        review.language = self.language.detect(text);
        if let Some(lang) = &review.language {
            if *lang != self.primary_language {
                flags.insert(ValidationFlag::NonPrimaryLanguage);
            }
        }

        if is_spam(text) {
            flags.insert(ValidationFlag::Spam);
        }

        if !self.seen.insert(content_hash(text)) {
            flags.insert(ValidationFlag::Duplicate);
        }

        review.is_valid = !flags.iter().any(|f| f.invalidates());
        if !flags.is_empty() {
            debug!(review_id = %review.review_id, flags = ?flags, "Review flagged");
        }
    }

    pub fn validate_all(&mut self, reviews: &mut [ProcessedReview]) -> usize {
        for review in reviews.iter_mut() {
            self.validate(review);
        }
        let valid = reviews.iter().filter(|r| r.is_valid).count();
        info!(
            total = reviews.len(),
            valid,
            flagged = reviews.len() - valid,
            "Validated reviews"
        );
        valid
    }
}
