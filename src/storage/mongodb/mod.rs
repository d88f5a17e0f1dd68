//! MongoDB history store.

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::FindOptions;
use mongodb::{Client, Collection};
use tracing::{debug, info};

use super::{HistoryRecord, HistoryStore, Page, Result, MAX_SKIP};

/// History persisted as `{ videoPath }` documents.
///
/// Reads sort on `_id` ascending. ObjectIds are generated at insert time and
/// increase monotonically, which pins results to insertion order instead of
/// relying on natural order.
pub struct MongoHistoryStore {
    client: Client,
    records: Collection<HistoryRecord>,
}

impl MongoHistoryStore {
    /// Connect with a URI and verify the server answers.
    pub async fn connect(uri: &str, database: &str, collection: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        Self::new(client, database, collection).await
    }

    /// Create a store on an existing client.
    pub async fn new(client: Client, database: &str, collection: &str) -> Result<Self> {
        let db = client.database(database);
        if let Err(e) = db.run_command(doc! { "ping": 1 }).await {
            client.shutdown().await;
            return Err(e.into());
        }

        info!(database = %database, collection = %collection, "Connected to MongoDB");

        Ok(Self {
            records: db.collection(collection),
            client,
        })
    }
}

#[async_trait]
impl HistoryStore for MongoHistoryStore {
    async fn insert(&self, record: &HistoryRecord) -> Result<()> {
        let result = self.records.insert_one(record).await?;
        debug!(
            inserted_id = %result.inserted_id,
            video_path = %record.video_path,
            "Inserted history record"
        );
        Ok(())
    }

    async fn query(&self, page: Page) -> Result<Vec<HistoryRecord>> {
        // Mongo treats a zero limit as "no limit".
        if page.limit == 0 {
            return Ok(Vec::new());
        }

        let options = FindOptions::builder()
            .sort(doc! { "_id": 1 })
            .skip(page.skip.min(MAX_SKIP))
            .limit(i64::try_from(page.limit).unwrap_or(i64::MAX))
            .build();

        let mut cursor = self.records.find(doc! {}).with_options(options).await?;

        let mut records = Vec::new();
        while cursor.advance().await? {
            records.push(cursor.deserialize_current()?);
        }
        Ok(records)
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
        info!("MongoDB client shut down");
    }
}
