use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Document};
use mongodb::options::{ClientOptions, IndexOptions, UpdateOptions};
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MongoSettings;
use crate::error::StorageError;
use crate::models::{ProcessedReview, TopicDescriptor};
use crate::storage::{stamped, storable_topics, BatchStatus, ReviewStore};

const REVIEWS: &str = "reviews";
const TOPICS: &str = "topics";
const QUEUE: &str = "processing_queue";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicDocument {
    pub firm_name: String,
    pub topic_id: i32,
    pub topic_name: String,
    pub keywords: Vec<String>,
    pub representative_docs: Vec<String>,
    pub count: u32,
    pub created_at: DateTime<Utc>,
}

impl TopicDocument {
    fn new(firm_name: &str, topic: &TopicDescriptor, created_at: DateTime<Utc>) -> Self {
        Self {
            firm_name: firm_name.to_string(),
            topic_id: topic.topic_id,
            topic_name: topic.topic_name.clone(),
            keywords: topic.keywords.clone(),
            representative_docs: topic.representative_docs.clone(),
            count: topic.count,
            created_at,
        }
    }
}

/// MongoDB-backed [`ReviewStore`].
pub struct MongoStore {
    client: Client,
    database_name: String,
}

impl MongoStore {
    pub async fn from_settings(settings: &MongoSettings) -> Result<Self, StorageError> {
        Self::new(&settings.uri, &settings.database).await
    }

    /// Connect and ping the server so a bad URI fails at startup.
    pub async fn new(connection_string: &str, database_name: &str) -> Result<Self, StorageError> {
        let client_options = ClientOptions::parse(connection_string).await?;
        let client = Client::with_options(client_options)?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await?;

        info!(database = %database_name, "Connected to MongoDB");

        Ok(MongoStore {
            client,
            database_name: database_name.to_string(),
        })
    }

    fn collection<T>(&self, name: &str) -> Collection<T> {
        self.client.database(&self.database_name).collection::<T>(name)
    }

    fn upsert() -> UpdateOptions {
        UpdateOptions::builder().upsert(true).build()
    }
}

fn index(keys: Document, unique: bool) -> IndexModel {
    let options = IndexOptions::builder().unique(unique.then_some(true)).build();
    IndexModel::builder().keys(keys).options(options).build()
}

#[async_trait]
impl ReviewStore for MongoStore {
    async fn initialize(&self) -> Result<(), StorageError> {
        self.collection::<Document>(REVIEWS)
            .create_indexes(
                vec![
                    index(doc! { "review_id": 1 }, true),
                    index(doc! { "firm_name": 1 }, false),
                    index(doc! { "sentiment_score": 1 }, false),
                    index(doc! { "date_posted": 1 }, false),
                    index(doc! { "primary_topic_id": 1 }, false),
                ],
                None,
            )
            .await?;
        self.collection::<Document>(TOPICS)
            .create_indexes(vec![index(doc! { "firm_name": 1, "topic_id": 1 }, false)], None)
            .await?;
        self.collection::<Document>(QUEUE)
            .create_indexes(vec![index(doc! { "batch_id": 1 }, true)], None)
            .await?;

        info!("Storage indexes ready");
        Ok(())
    }

    async fn create_batch(&self, batch_id: &str, firm_name: &str, total: usize) -> Result<(), StorageError> {
        let now = mongodb::bson::to_bson(&Utc::now())?;
        let status = mongodb::bson::to_bson(&BatchStatus::Processing)?;
        self.collection::<Document>(QUEUE)
            .update_one(
                doc! { "batch_id": batch_id },
                doc! {
                    "$set": {
                        "firm_name": firm_name,
                        "status": status,
                        "total_reviews": total as i64,
                        "processed_reviews": 0i64,
                        "updated_at": now.clone(),
                    },
                    "$setOnInsert": { "created_at": now },
                },
                Self::upsert(),
            )
            .await?;
        debug!(batch_id, firm = %firm_name, total, "Created processing batch");
        Ok(())
    }

    async fn record_batch_progress(&self, batch_id: &str, processed: usize) -> Result<(), StorageError> {
        let result = self
            .collection::<Document>(QUEUE)
            .update_one(
                doc! { "batch_id": batch_id },
                doc! { "$set": {
                    "processed_reviews": processed as i64,
                    "updated_at": mongodb::bson::to_bson(&Utc::now())?,
                } },
                None,
            )
            .await?;
        if result.matched_count == 0 {
            warn!(batch_id, "Progress recorded for unknown batch");
        }
        Ok(())
    }

    async fn finish_batch(&self, batch_id: &str, error: Option<&str>) -> Result<(), StorageError> {
        let status = if error.is_some() {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
        self.collection::<Document>(QUEUE)
            .update_one(
                doc! { "batch_id": batch_id },
                doc! { "$set": {
                    "status": mongodb::bson::to_bson(&status)?,
                    "error_message": error,
                    "updated_at": mongodb::bson::to_bson(&Utc::now())?,
                } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn upsert_reviews(&self, reviews: &[ProcessedReview]) -> Result<usize, StorageError> {
        let collection = self.collection::<Document>(REVIEWS);
        let now = Utc::now();

        for review in reviews {
            let document = mongodb::bson::to_document(&stamped(review, now))?;
            collection
                .update_one(
                    doc! { "review_id": &review.review_id },
                    doc! { "$set": document },
                    Self::upsert(),
                )
                .await?;
        }

        debug!(count = reviews.len(), "Upserted reviews");
        Ok(reviews.len())
    }

    async fn insert_topics(&self, firm_name: &str, topics: &[TopicDescriptor]) -> Result<usize, StorageError> {
        let collection = self.collection::<TopicDocument>(TOPICS);
        let now = Utc::now();
        let documents: Vec<TopicDocument> = storable_topics(topics)
            .map(|t| TopicDocument::new(firm_name, t, now))
            .collect();

        collection
            .delete_many(doc! { "firm_name": firm_name }, None)
            .await?;
        if documents.is_empty() {
            return Ok(0);
        }

        let result = collection.insert_many(documents, None).await?;
        info!(firm = %firm_name, topics = result.inserted_ids.len(), "Stored topics");
        Ok(result.inserted_ids.len())
    }
}
