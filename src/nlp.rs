//! NLP collaborators and the rules applied to their output.
//!
//! Every collaborator may fail per call. [`Collaborators::enrich`] turns a
//! failure into the neutral value for that field and moves on; nothing here
//! aborts a batch.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embeddings::HashingEmbedder;
use crate::error::CollaboratorError;
use crate::models::{Aspect, Entity, ProcessedReview, TopicDescriptor};

/// Classifier inputs are cut to this many characters.
pub const CLASSIFIER_MAX_CHARS: usize = 512;
pub const SUMMARY_MAX_CHARS: usize = 1024;
/// Texts shorter than this many words are their own summary.
pub const SUMMARY_MIN_WORDS: usize = 50;
/// Topic distribution entries at or below this weight are dropped.
pub const MIN_TOPIC_WEIGHT: f32 = 0.01;
pub const OUTLIER_TOPIC: i32 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub label: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub entities: Vec<Entity>,
    pub aspects: Vec<Aspect>,
    pub key_phrases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicAssignment {
    pub topic_id: i32,
    pub distribution: BTreeMap<String, f32>,
}

/// Output of a whole-corpus topic fit: one assignment per input document,
/// in input order, plus the topic descriptors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicModel {
    pub assignments: Vec<TopicAssignment>,
    pub topics: Vec<TopicDescriptor>,
}

#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    async fn sentiment(&self, text: &str) -> Result<Sentiment, CollaboratorError>;

    /// Emotion label → raw score.
    async fn emotions(&self, text: &str) -> Result<BTreeMap<String, f32>, CollaboratorError>;

    async fn summarize(&self, text: &str) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Extraction, CollaboratorError>;
}

#[async_trait]
pub trait TopicModeler: Send + Sync {
    async fn fit(&self, documents: &[String]) -> Result<TopicModel, CollaboratorError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError>;
}

pub trait LanguageDetector: Send + Sync {
    /// ISO 639-1 code, or `None` when the text gives nothing to go on.
    fn detect(&self, text: &str) -> Option<String>;
}

/// The set of collaborators one pipeline run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub analyzer: Arc<dyn TextAnalyzer>,
    pub extractor: Arc<dyn FeatureExtractor>,
    pub topics: Arc<dyn TopicModeler>,
    pub embedder: Arc<dyn Embedder>,
    pub language: Arc<dyn LanguageDetector>,
}

impl Collaborators {
    /// Collaborators that need no inference service.
    pub fn local(embedding_dim: usize) -> Self {
        Self {
            analyzer: Arc::new(NeutralAnalyzer),
            extractor: Arc::new(KeywordExtractor),
            topics: Arc::new(AspectTopicModeler::default()),
            embedder: Arc::new(HashingEmbedder::new(embedding_dim)),
            language: Arc::new(StopwordDetector),
        }
    }

    /// Fill the enrichment fields of one valid review.
    pub async fn enrich(&self, review: &mut ProcessedReview) {
        let text = review.content.clone();
        let short = truncate_chars(&text, CLASSIFIER_MAX_CHARS);

        let (label, score) = match self.analyzer.sentiment(short).await {
            Ok(raw) => normalize_sentiment(&raw),
            Err(e) => {
                warn!(review_id = %review.review_id, error = %e, "Sentiment analysis failed");
                ("neutral".to_string(), 0.0)
            }
        };
        review.sentiment_label = Some(label);
        review.sentiment_score = Some(score);

        match self.analyzer.emotions(short).await {
            Ok(raw) => {
                review.dominant_emotion = dominant(&raw);
                review.emotion_scores = raw.into_iter().map(|(k, v)| (k, round4(v))).collect();
            }
            Err(e) => {
                warn!(review_id = %review.review_id, error = %e, "Emotion analysis failed");
                review.emotion_scores.clear();
                review.dominant_emotion = None;
            }
        }

        review.summary = Some(if word_count(&text) < SUMMARY_MIN_WORDS {
            text.clone()
        } else {
            match self.analyzer.summarize(truncate_chars(&text, SUMMARY_MAX_CHARS)).await {
                Ok(summary) => summary.replace(" .", ".").trim().to_string(),
                Err(e) => {
                    warn!(review_id = %review.review_id, error = %e, "Summary generation failed");
                    lead_sentences(&text, 2)
                }
            }
        });

        match self.extractor.extract(&text).await {
            Ok(found) => {
                review.entities = found.entities;
                review.aspects = found.aspects;
                review.key_phrases = found.key_phrases;
            }
            Err(e) => {
                warn!(review_id = %review.review_id, error = %e, "Feature extraction failed");
                review.entities.clear();
                review.aspects.clear();
                review.key_phrases.clear();
            }
        }
    }
}

/// The first `max` characters of `text`, on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Map a classifier label onto positive/negative/neutral; negative labels
/// carry a negative score.
pub fn normalize_sentiment(raw: &Sentiment) -> (String, f32) {
    let label = match raw.label.to_lowercase().as_str() {
        "positive" | "pos" | "label_2" => "positive",
        "negative" | "neg" | "label_0" => "negative",
        _ => "neutral",
    };
    let score = if label == "negative" {
        -raw.score.abs()
    } else {
        raw.score
    };
    (label.to_string(), score)
}

pub fn round4(value: f32) -> f32 {
    (value * 10_000.0).round() / 10_000.0
}

pub fn dominant(scores: &BTreeMap<String, f32>) -> Option<String> {
    scores
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(label, _)| label.clone())
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// First `n` sentences, used when no summary can be generated.
pub fn lead_sentences(text: &str, n: usize) -> String {
    let sentences: Vec<&str> = text
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(n)
        .collect();
    if sentences.is_empty() {
        return text.trim().to_string();
    }
    format!("{}.", sentences.join(". "))
}

/// Drop negligible topic weights.
pub fn prune_distribution(distribution: BTreeMap<String, f32>) -> BTreeMap<String, f32> {
    distribution
        .into_iter()
        .filter(|(_, weight)| *weight > MIN_TOPIC_WEIGHT)
        .collect()
}

/// Used when no inference service is configured: neutral sentiment, no
/// emotions, lead-sentence summaries.
pub struct NeutralAnalyzer;

#[async_trait]
impl TextAnalyzer for NeutralAnalyzer {
    async fn sentiment(&self, _text: &str) -> Result<Sentiment, CollaboratorError> {
        Ok(Sentiment {
            label: "neutral".to_string(),
            score: 0.0,
        })
    }

    async fn emotions(&self, _text: &str) -> Result<BTreeMap<String, f32>, CollaboratorError> {
        Ok(BTreeMap::new())
    }

    async fn summarize(&self, text: &str) -> Result<String, CollaboratorError> {
        Ok(lead_sentences(text, 2))
    }
}

const ASPECT_KEYWORDS: &[(&str, &[&str])] = &[
    ("funding", &["funding", "challenge fee", "evaluation fee", "profit split", "subscription"]),
    ("rules", &["rules", "restrictions", "drawdown", "daily loss", "consistency rule", "trading days"]),
    (
        "platform",
        &["platform", "software", "mt4", "mt5", "tradingview", "topstepx", "ctrader", "match trader", "dxtrade", "tradelocker"],
    ),
    ("spreads", &["spread", "pip", "commission"]),
    ("features", &["charting", "indicators"]),
    ("execution", &["execution", "slippage", "speed", "latency", "fill"]),
    ("support", &["support", "customer service", "help", "response", "team"]),
    ("withdrawal", &["withdrawal", "withdraw", "payout", "payment", "funds"]),
    ("verification", &["verification", "kyc", "documents", "identity", "verify"]),
    ("leverage", &["leverage", "margin", "lot", "position size"]),
    ("reliability", &["reliable", "trust", "scam", "legit", "honest"]),
    ("stability", &["crash", "bug", "glitch", "lag", "freeze", "downtime"]),
];

const POSITIVE_WORDS: &[&str] = &[
    "smooth", "reliable", "stable", "instant", "seamless", "accurate", "tight", "fast", "responsive",
    "helpful", "transparent", "fair", "generous", "flexible", "hassle-free", "excellent", "outstanding",
    "top-notch", "recommend", "satisfied", "good", "great", "best", "love", "quick",
];

const NEGATIVE_WORDS: &[&str] = &[
    "slow", "laggy", "buggy", "crash", "freeze", "unstable", "slippage", "requotes", "rejected",
    "unresponsive", "rude", "delayed", "hidden fees", "rigged", "strict", "scam", "fraud", "dishonest",
    "worst", "avoid", "frustrating", "denied", "never",
];

const STOPWORDS_EN: &[&str] = &[
    "the", "and", "is", "was", "to", "of", "it", "i", "my", "with", "for", "this", "that", "they",
    "very", "not", "but", "have", "you", "are", "a", "an", "in", "on", "be", "so", "me", "we",
    "had", "has", "were", "their", "them", "at", "as", "by", "or", "from",
];
const STOPWORDS_FR: &[&str] = &[
    "le", "les", "et", "est", "pas", "très", "je", "une", "des", "du", "pour", "avec", "que", "sont",
    "mais", "il", "elle", "nous", "vous", "c'est", "au", "aux",
];
const STOPWORDS_DE: &[&str] = &[
    "der", "die", "das", "und", "ist", "nicht", "ich", "sehr", "mit", "ein", "eine", "zu", "auf",
    "für", "es", "sie", "wir", "aber", "auch", "den", "dem",
];
const STOPWORDS_ES: &[&str] = &[
    "el", "los", "las", "y", "es", "muy", "que", "con", "para", "por", "una", "pero", "su", "lo",
    "del", "como", "más", "fue",
];
const STOPWORDS_IT: &[&str] = &[
    "il", "di", "che", "è", "non", "per", "una", "sono", "con", "molto", "ma", "gli", "della", "ho",
];
const STOPWORDS_PT: &[&str] = &[
    "o", "os", "e", "é", "não", "muito", "com", "para", "uma", "mas", "foi", "do", "da", "em", "que",
];

fn lowercase_words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '-'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Entities, aspects and key phrases from keyword tables and patterns.
pub struct KeywordExtractor;

struct EntityPatterns {
    instrument: Regex,
    money: Regex,
    price_movement: Regex,
    timeframe: Regex,
    signal: Regex,
}

fn entity_patterns() -> &'static EntityPatterns {
    static PATTERNS: OnceLock<EntityPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        const CCY: &str = "EUR|USD|GBP|JPY|AUD|CAD|CHF|NZD|CNY|SGD|HKD|MXN|ZAR|BTC|ETH";
        EntityPatterns {
            instrument: Regex::new(&format!(r"\b(?:{CCY})\s?/?\s?(?:{CCY})\b")).expect("valid regex"),
            money: Regex::new(r"(?:[$£€¥]\s?\d[\d,]*(?:\.\d+)?(?:\s?[kK])?|\b\d[\d,]*(?:\.\d+)?\s?(?:USD|EUR|GBP|dollars)\b)")
                .expect("valid regex"),
            price_movement: Regex::new(r"(?i)\b\d+(?:\.\d+)?\s?(?:pips|points|ticks)\b").expect("valid regex"),
            timeframe: Regex::new(r"\b\d+[mhdwM]\b").expect("valid regex"),
            signal: Regex::new(r"(?i)\b(?:bullish|bearish)\b").expect("valid regex"),
        }
    })
}

impl KeywordExtractor {
    fn entities(text: &str) -> Vec<Entity> {
        let patterns = entity_patterns();
        let mut entities = Vec::new();
        let mut push = |re: &Regex, kind: &str| {
            for m in re.find_iter(text) {
                entities.push(Entity {
                    text: m.as_str().trim().to_string(),
                    kind: kind.to_string(),
                });
            }
        };
        push(&patterns.instrument, "instrument");
        push(&patterns.money, "money");
        push(&patterns.price_movement, "price_movement");
        push(&patterns.timeframe, "timeframe");
        push(&patterns.signal, "trading_signal");
        entities
    }

    fn aspects(text: &str) -> Vec<Aspect> {
        let lower = text.to_lowercase();
        let words = lowercase_words(text);
        let mut aspects = Vec::new();

        for (aspect, keywords) in ASPECT_KEYWORDS {
            let mut mentions = 0u32;
            let mut polarity = 0.0f32;

            for (i, word) in words.iter().enumerate() {
                let single = keywords.iter().any(|k| !k.contains(' ') && word.starts_with(*k));
                if !single {
                    continue;
                }
                mentions += 1;
                let start = i.saturating_sub(5);
                let end = (i + 6).min(words.len());
                polarity += context_polarity(&words[start..end].join(" "));
            }
            for phrase in keywords.iter().filter(|k| k.contains(' ')) {
                let count = lower.matches(*phrase).count() as u32;
                mentions += count;
            }

            if mentions > 0 {
                aspects.push(Aspect {
                    aspect: aspect.to_string(),
                    mentions,
                    sentiment: Some(round4(polarity / mentions as f32)),
                });
            }
        }
        aspects
    }

    /// Most frequent two and three word runs without stopwords.
    fn key_phrases(text: &str) -> Vec<String> {
        let words = lowercase_words(text);
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();

        for n in [2usize, 3] {
            for (pos, window) in words.windows(n).enumerate() {
                if window.iter().any(|w| STOPWORDS_EN.contains(&w.as_str()) || w.len() < 3) {
                    continue;
                }
                let entry = counts.entry(window.join(" ")).or_insert((0, pos));
                entry.0 += 1;
            }
        }

        let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)).then(a.0.cmp(&b.0)));
        ranked.into_iter().take(10).map(|(phrase, _)| phrase).collect()
    }
}

/// +1 / -1 / 0 from positive and negative cue words.
fn context_polarity(context: &str) -> f32 {
    let pos = POSITIVE_WORDS.iter().filter(|w| context.contains(*w)).count();
    let neg = NEGATIVE_WORDS.iter().filter(|w| context.contains(*w)).count();
    match pos.cmp(&neg) {
        std::cmp::Ordering::Greater => 1.0,
        std::cmp::Ordering::Less => -1.0,
        std::cmp::Ordering::Equal => 0.0,
    }
}

#[async_trait]
impl FeatureExtractor for KeywordExtractor {
    async fn extract(&self, text: &str) -> Result<Extraction, CollaboratorError> {
        Ok(Extraction {
            entities: Self::entities(text),
            aspects: Self::aspects(text),
            key_phrases: Self::key_phrases(text),
        })
    }
}

/// Groups documents by their dominant aspect. Documents that mention no
/// aspect land in the outlier topic.
#[derive(Debug, Default)]
pub struct AspectTopicModeler;

#[async_trait]
impl TopicModeler for AspectTopicModeler {
    async fn fit(&self, documents: &[String]) -> Result<TopicModel, CollaboratorError> {
        let mut assignments = Vec::with_capacity(documents.len());
        let mut members: BTreeMap<i32, Vec<usize>> = BTreeMap::new();

        for (doc_index, doc) in documents.iter().enumerate() {
            let aspects = KeywordExtractor::aspects(doc);
            let total: u32 = aspects.iter().map(|a| a.mentions).sum();

            let Some(top) = aspects.iter().max_by_key(|a| a.mentions) else {
                assignments.push(TopicAssignment {
                    topic_id: OUTLIER_TOPIC,
                    distribution: BTreeMap::new(),
                });
                continue;
            };

            let topic_id = aspect_topic_id(&top.aspect);
            let distribution = aspects
                .iter()
                .map(|a| (aspect_topic_id(&a.aspect).to_string(), a.mentions as f32 / total as f32))
                .collect();
            members.entry(topic_id).or_default().push(doc_index);
            assignments.push(TopicAssignment {
                topic_id,
                distribution,
            });
        }

        let topics = members
            .into_iter()
            .map(|(topic_id, docs)| {
                let (aspect, keywords) = ASPECT_KEYWORDS[topic_id as usize];
                TopicDescriptor {
                    topic_id,
                    topic_name: format!("{}_{}", topic_id, aspect),
                    keywords: keywords.iter().take(10).map(|k| k.to_string()).collect(),
                    representative_docs: docs.iter().take(3).map(|&i| documents[i].clone()).collect(),
                    count: docs.len() as u32,
                }
            })
            .collect();

        debug!(documents = documents.len(), "Fitted aspect topics");
        Ok(TopicModel {
            assignments,
            topics,
        })
    }
}

fn aspect_topic_id(aspect: &str) -> i32 {
    ASPECT_KEYWORDS
        .iter()
        .position(|(name, _)| *name == aspect)
        .map(|i| i as i32)
        .unwrap_or(OUTLIER_TOPIC)
}

/// Stopword-frequency language guess. Latin-script text with no stopword
/// hits is taken as English; other scripts map to their main language.
pub struct StopwordDetector;

impl LanguageDetector for StopwordDetector {
    fn detect(&self, text: &str) -> Option<String> {
        let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
        if letters.is_empty() {
            return None;
        }

        let latin = letters.iter().filter(|c| c.is_ascii_alphabetic() || ('\u{00C0}'..='\u{024F}').contains(*c)).count();
        if latin * 2 < letters.len() {
            return script_language(&letters);
        }

        let words = lowercase_words(text);
        let tables: [(&str, &[&str]); 6] = [
            ("en", STOPWORDS_EN),
            ("fr", STOPWORDS_FR),
            ("de", STOPWORDS_DE),
            ("es", STOPWORDS_ES),
            ("it", STOPWORDS_IT),
            ("pt", STOPWORDS_PT),
        ];

        let mut best = ("en", 0usize);
        for (lang, table) in tables {
            let hits = words.iter().filter(|w| table.contains(&w.as_str())).count();
            if hits > best.1 {
                best = (lang, hits);
            }
        }
        Some(best.0.to_string())
    }
}

fn script_language(letters: &[char]) -> Option<String> {
    let count = |range: std::ops::RangeInclusive<char>| letters.iter().filter(|c| range.contains(*c)).count();
    let scripts = [
        ("ru", count('\u{0400}'..='\u{04FF}')),
        ("ar", count('\u{0600}'..='\u{06FF}')),
        ("zh", count('\u{4E00}'..='\u{9FFF}')),
        ("ja", count('\u{3040}'..='\u{30FF}')),
        ("ko", count('\u{AC00}'..='\u{D7AF}')),
        ("el", count('\u{0370}'..='\u{03FF}')),
        ("he", count('\u{0590}'..='\u{05FF}')),
    ];
    scripts
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .max_by_key(|(_, n)| *n)
        .map(|(lang, _)| lang.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::review;

    struct FailingAnalyzer;

    #[async_trait]
    impl TextAnalyzer for FailingAnalyzer {
        async fn sentiment(&self, _: &str) -> Result<Sentiment, CollaboratorError> {
            Err(CollaboratorError::InvalidOutput("down".into()))
        }
        async fn emotions(&self, _: &str) -> Result<BTreeMap<String, f32>, CollaboratorError> {
            Err(CollaboratorError::InvalidOutput("down".into()))
        }
        async fn summarize(&self, _: &str) -> Result<String, CollaboratorError> {
            Err(CollaboratorError::InvalidOutput("down".into()))
        }
    }

    struct FixedAnalyzer;

    #[async_trait]
    impl TextAnalyzer for FixedAnalyzer {
        async fn sentiment(&self, _: &str) -> Result<Sentiment, CollaboratorError> {
            Ok(Sentiment { label: "Negative".into(), score: 0.91 })
        }
        async fn emotions(&self, _: &str) -> Result<BTreeMap<String, f32>, CollaboratorError> {
            Ok(BTreeMap::from([("anger".to_string(), 0.712345), ("joy".to_string(), 0.1)]))
        }
        async fn summarize(&self, _: &str) -> Result<String, CollaboratorError> {
            Ok("Short summary .".into())
        }
    }

    fn with_analyzer(analyzer: Arc<dyn TextAnalyzer>) -> Collaborators {
        Collaborators {
            analyzer,
            ..Collaborators::local(8)
        }
    }

    fn long_text() -> String {
        let sentence = "The payout arrived after two weeks of waiting for support to answer. ";
        sentence.repeat(6)
    }

    #[tokio::test]
    async fn failures_degrade_to_neutral_defaults() {
        let collab = with_analyzer(Arc::new(FailingAnalyzer));
        let mut r = ProcessedReview::from_raw("Acme", &review("1", &long_text()));
        collab.enrich(&mut r).await;

        assert_eq!(r.sentiment_label.as_deref(), Some("neutral"));
        assert_eq!(r.sentiment_score, Some(0.0));
        assert!(r.emotion_scores.is_empty());
        assert_eq!(r.dominant_emotion, None);
        assert_eq!(
            r.summary.as_deref(),
            Some("The payout arrived after two weeks of waiting for support to answer. The payout arrived after two weeks of waiting for support to answer.")
        );
    }

    #[tokio::test]
    async fn classifier_output_is_post_processed() {
        let collab = with_analyzer(Arc::new(FixedAnalyzer));
        let mut r = ProcessedReview::from_raw("Acme", &review("1", &long_text()));
        collab.enrich(&mut r).await;

        assert_eq!(r.sentiment_label.as_deref(), Some("negative"));
        assert_eq!(r.sentiment_score, Some(-0.91));
        assert_eq!(r.emotion_scores.get("anger"), Some(&0.7123));
        assert_eq!(r.dominant_emotion.as_deref(), Some("anger"));
        assert_eq!(r.summary.as_deref(), Some("Short summary."));
    }

    #[tokio::test]
    async fn short_text_is_its_own_summary() {
        let collab = with_analyzer(Arc::new(FixedAnalyzer));
        let mut r = ProcessedReview::from_raw("Acme", &review("1", "Fast payout, great support"));
        collab.enrich(&mut r).await;
        assert_eq!(r.summary.as_deref(), Some("Fast payout, great support"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn prune_drops_small_weights() {
        let pruned = prune_distribution(BTreeMap::from([
            ("0".to_string(), 0.9),
            ("1".to_string(), 0.01),
            ("2".to_string(), 0.005),
        ]));
        assert_eq!(pruned.len(), 1);
    }

    #[tokio::test]
    async fn extractor_finds_aspects_and_entities() {
        let text = "Payout of $2,500 took 3 days but support was helpful. EUR/USD spreads are tight, made 40 pips on 15m.";
        let found = KeywordExtractor.extract(text).await.unwrap();

        let aspects: Vec<&str> = found.aspects.iter().map(|a| a.aspect.as_str()).collect();
        assert!(aspects.contains(&"withdrawal"));
        assert!(aspects.contains(&"support"));
        assert!(aspects.contains(&"spreads"));

        let kinds: Vec<&str> = found.entities.iter().map(|e| e.kind.as_str()).collect();
        assert!(kinds.contains(&"instrument"));
        assert!(kinds.contains(&"money"));
        assert!(kinds.contains(&"price_movement"));
        assert!(kinds.contains(&"timeframe"));
    }

    #[tokio::test]
    async fn aspect_topics_assign_every_document() {
        let docs = vec![
            "Payout was quick, payout again next week".to_string(),
            "Nothing relevant here at all".to_string(),
            "Support team answered fast".to_string(),
        ];
        let model = AspectTopicModeler.fit(&docs).await.unwrap();
        assert_eq!(model.assignments.len(), 3);
        assert_eq!(model.assignments[1].topic_id, OUTLIER_TOPIC);
        assert!(model.topics.iter().all(|t| t.topic_id != OUTLIER_TOPIC));
        assert_eq!(model.topics.iter().map(|t| t.count).sum::<u32>(), 2);
    }

    #[test]
    fn language_guess() {
        let d = StopwordDetector;
        assert_eq!(d.detect("Great service!!!").as_deref(), Some("en"));
        assert_eq!(d.detect("Le service est très bien et les retraits sont rapides").as_deref(), Some("fr"));
        assert_eq!(d.detect("Das ist nicht gut und ich bin sehr enttäuscht").as_deref(), Some("de"));
        assert_eq!(d.detect("Отличный сервис").as_deref(), Some("ru"));
        assert_eq!(d.detect("!!! 123").as_deref(), None);
    }
}
