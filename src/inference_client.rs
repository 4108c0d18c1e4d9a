use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CollaboratorError;
use crate::nlp::{
    Collaborators, Embedder, KeywordExtractor, Sentiment, StopwordDetector, TextAnalyzer, TopicModel,
    TopicModeler,
};

const SUMMARY_MAX_TOKENS: u32 = 130;
const SUMMARY_MIN_TOKENS: u32 = 30;

#[derive(Serialize)]
struct TextRequest<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct SummaryRequest<'a> {
    text: &'a str,
    max_length: u32,
    min_length: u32,
}

#[derive(Serialize)]
struct CorpusRequest<'a> {
    documents: &'a [String],
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct SummaryResponse {
    summary: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// HTTP client for the model-serving service behind `INFERENCE_URL`.
///
/// Endpoints: `/sentiment`, `/emotions`, `/summarize`, `/topics`, `/embed`,
/// all JSON in and JSON out.
#[derive(Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    base_url: String,
    dimension: usize,
}

impl InferenceClient {
    pub fn new(base_url: &str, dimension: usize) -> Result<Self, CollaboratorError> {
        // no timeout on model work, only on connecting
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            dimension,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, CollaboratorError> {
        let url = self.endpoint(path);
        debug!(url = %url, "Inference request");

        let response = self.http.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Service {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    /// Collaborator set backed by this service. Feature extraction and
    /// language detection stay local.
    pub fn into_collaborators(self) -> Collaborators {
        let client = Arc::new(self);
        info!(base_url = %client.base_url, "Using remote inference service");
        Collaborators {
            analyzer: client.clone(),
            extractor: Arc::new(KeywordExtractor),
            topics: client.clone(),
            embedder: client,
            language: Arc::new(StopwordDetector),
        }
    }
}

#[async_trait]
impl TextAnalyzer for InferenceClient {
    async fn sentiment(&self, text: &str) -> Result<Sentiment, CollaboratorError> {
        self.post("sentiment", &TextRequest { text }).await
    }

    async fn emotions(&self, text: &str) -> Result<BTreeMap<String, f32>, CollaboratorError> {
        self.post("emotions", &TextRequest { text }).await
    }

    async fn summarize(&self, text: &str) -> Result<String, CollaboratorError> {
        let request = SummaryRequest {
            text,
            max_length: SUMMARY_MAX_TOKENS,
            min_length: SUMMARY_MIN_TOKENS,
        };
        let response: SummaryResponse = self.post("summarize", &request).await?;
        Ok(response.summary)
    }
}

#[async_trait]
impl TopicModeler for InferenceClient {
    async fn fit(&self, documents: &[String]) -> Result<TopicModel, CollaboratorError> {
        let model: TopicModel = self.post("topics", &CorpusRequest { documents }).await?;
        if model.assignments.len() != documents.len() {
            return Err(CollaboratorError::InvalidOutput(format!(
                "{} topic assignments for {} documents",
                model.assignments.len(),
                documents.len()
            )));
        }
        Ok(model)
    }
}

#[async_trait]
impl Embedder for InferenceClient {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        let response: EmbedResponse = self.post("embed", &EmbedRequest { texts }).await?;
        if response.embeddings.len() != texts.len() {
            return Err(CollaboratorError::InvalidOutput(format!(
                "{} embeddings for {} texts",
                response.embeddings.len(),
                texts.len()
            )));
        }
        Ok(response.embeddings)
    }
}
