use crate::error::AppError;

use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};
use tracing::debug;

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// # Initialize a new database client
    ///
    /// Root credentials are only sent when a username is configured, so the
    /// embedded `mem://` and `surrealkv://` engines work without them.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        if !username.is_empty() {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Defines the tables and indexes used by the corpus stores. Safe to run
    /// on every start.
    pub async fn ensure_schema(&self, dimension: usize) -> Result<(), AppError> {
        debug!(dimension, "ensuring surrealdb schema");
        let query = format!(
            "DEFINE TABLE IF NOT EXISTS chunk SCHEMALESS;
             DEFINE INDEX IF NOT EXISTS idx_chunk_document ON TABLE chunk FIELDS document_id;
             DEFINE INDEX IF NOT EXISTS idx_chunk_key ON TABLE chunk FIELDS chunk_key UNIQUE;
             DEFINE INDEX IF NOT EXISTS idx_chunk_embedding ON TABLE chunk FIELDS embedding HNSW DIMENSION {dimension} DIST COSINE EFC 64 M 16;
             DEFINE TABLE IF NOT EXISTS document SCHEMALESS;
             DEFINE TABLE IF NOT EXISTS corpus_meta SCHEMALESS;
             DEFINE TABLE IF NOT EXISTS response_cache SCHEMALESS;
             DEFINE INDEX IF NOT EXISTS idx_cache_tag ON TABLE response_cache FIELDS tag;"
        );

        self.client.query(query).await?.check()?;
        Ok(())
    }

    /// Operation to store or replace an object, requires the struct to implement StoredObject
    pub async fn upsert_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        let id = item.get_id().to_owned();
        self.client
            .upsert((T::table_name(), id))
            .content(item)
            .await
    }

    /// Operation to retrieve all objects from a certain table, requires the struct to implement StoredObject
    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    /// Operation to retrieve a single object by its ID, requires the struct to implement StoredObject
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Operation to delete a single object by its ID, requires the struct to implement StoredObject
    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
