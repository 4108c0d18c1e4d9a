use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Firm metadata scraped from the top of a review page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirmInfo {
    pub name: String,
    pub source_url: String,
    pub rating: f32,
    pub total_reviews: u32,
    /// Star level → share of reviews in percent.
    pub rating_distribution: BTreeMap<u8, f32>,
    pub claimed: bool,
    pub website: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
}

/// One review as captured by the harvest layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub source_id: String,
    pub author_name: String,
    pub rating: u8,
    pub title: String,
    pub content: String,
    pub date_posted: DateTime<Utc>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub date_of_experience: Option<NaiveDate>,
    #[serde(default)]
    pub reply_content: Option<String>,
    #[serde(default)]
    pub reply_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author_reviews_count: Option<u32>,
    #[serde(default)]
    pub author_location: Option<String>,
}

impl Review {
    /// Basic record checks applied when a card is parsed.
    pub fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.source_id.is_empty() {
            errors.push("missing review id".to_string());
        }
        if self.author_name.is_empty() {
            errors.push("missing author name".to_string());
        }
        if !(1..=5).contains(&self.rating) {
            errors.push(format!("rating {} out of range", self.rating));
        }
        if self.date_posted > Utc::now() {
            errors.push("posted in the future".to_string());
        }
        errors
    }
}

/// A single page of reviews returned by a fetch strategy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewPage {
    pub reviews: Vec<Review>,
    pub has_next: bool,
    /// Total page count when the page shows a "Page X of Y" summary.
    pub total_pages: Option<u32>,
}

/// Aggregate of one firm's harvest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmResult {
    pub firm_name: String,
    pub source_url: String,
    pub category: Option<String>,
    pub firm: Option<FirmInfo>,
    pub reviews: Vec<Review>,
    pub scrape_date: DateTime<Utc>,
    pub strategy: Option<String>,
    pub total_pages: u32,
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFlag {
    MissingText,
    TooShort,
    TooLong,
    NonPrimaryLanguage,
    Spam,
    Duplicate,
}

impl ValidationFlag {
    /// Hard flags make a review invalid; the rest are informational.
    pub fn invalidates(self) -> bool {
        matches!(
            self,
            ValidationFlag::MissingText
                | ValidationFlag::TooShort
                | ValidationFlag::TooLong
                | ValidationFlag::Spam
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aspect {
    pub aspect: String,
    pub mentions: u32,
    #[serde(default)]
    pub sentiment: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub kind: String,
}

/// Version of the [`ProcessedReview`] layout written into checkpoints and storage.
pub const PROCESSING_VERSION: &str = "1.0";

/// A review moving through the processing pipeline. Raw fields are fixed at
/// load time, enrichment fields are filled stage by stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedReview {
    pub firm_name: String,
    /// Firm-scoped unique identifier, `{firm}_{source_id}`.
    pub review_id: String,
    pub author_name: Option<String>,
    pub rating: Option<u8>,
    pub date_posted: Option<DateTime<Utc>>,
    pub content: String,
    pub title: Option<String>,

    pub is_valid: bool,
    pub validation_flags: BTreeSet<ValidationFlag>,
    pub language: Option<String>,

    pub sentiment_score: Option<f32>,
    pub sentiment_label: Option<String>,
    pub emotion_scores: BTreeMap<String, f32>,
    pub dominant_emotion: Option<String>,
    pub summary: Option<String>,

    pub entities: Vec<Entity>,
    pub aspects: Vec<Aspect>,
    pub key_phrases: Vec<String>,

    pub primary_topic_id: Option<i32>,
    pub topic_distribution: BTreeMap<String, f32>,

    pub embedding: Option<Vec<f32>>,

    pub processed_at: Option<DateTime<Utc>>,
    pub processing_version: String,
}

impl ProcessedReview {
    /// Seed a pipeline record from a harvested review.
    pub fn from_raw(firm_name: &str, review: &Review) -> Self {
        let source_id = if review.source_id.trim().is_empty() {
            fallback_source_id(review)
        } else {
            review.source_id.clone()
        };

        Self {
            firm_name: firm_name.to_string(),
            review_id: format!("{}_{}", firm_name, source_id),
            author_name: Some(review.author_name.clone()).filter(|a| !a.is_empty()),
            rating: Some(review.rating).filter(|r| (1..=5).contains(r)),
            date_posted: Some(review.date_posted),
            content: review.content.clone(),
            title: Some(review.title.clone()).filter(|t| !t.is_empty()),
            is_valid: true,
            validation_flags: BTreeSet::new(),
            language: None,
            sentiment_score: None,
            sentiment_label: None,
            emotion_scores: BTreeMap::new(),
            dominant_emotion: None,
            summary: None,
            entities: Vec::new(),
            aspects: Vec::new(),
            key_phrases: Vec::new(),
            primary_topic_id: None,
            topic_distribution: BTreeMap::new(),
            embedding: None,
            processed_at: None,
            processing_version: PROCESSING_VERSION.to_string(),
        }
    }
}

/// Deterministic id for reviews whose card carried no identifier.
fn fallback_source_id(review: &Review) -> String {
    let mut hasher = Sha256::new();
    hasher.update(review.author_name.as_bytes());
    hasher.update(review.date_posted.to_rfc3339().as_bytes());
    hasher.update(review.content.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(12).map(|b| format!("{:02x}", b)).collect()
}

/// Topic description produced by the topic-modeling collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicDescriptor {
    pub topic_id: i32,
    pub topic_name: String,
    pub keywords: Vec<String>,
    pub representative_docs: Vec<String>,
    pub count: u32,
}
