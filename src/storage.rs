//! Storage layer for verification records
//!
//! Provides a persistent storage implementation using Cloudflare R2 / AWS S3,
//! plus a process-local backend with the same semantics.

use crate::config::Settings;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Object key prefix shared by all verification records
pub const VERIFICATION_PREFIX: &str = "verifications/";

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Error retrieving object from S3
    #[error("S3 Get error: {0}")]
    S3Get(Box<SdkError<GetObjectError>>),
    /// Error putting object into S3
    #[error("S3 put error: {0}")]
    S3Put(String),
    /// Error listing objects in S3
    #[error("S3 list error: {0}")]
    S3List(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration error (missing credentials, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// One record per user; `None` means never verified or reset.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserVerification {
    /// Telegram user ID
    pub user_id: i64,
    /// Time of the last completed redirect
    pub last_verified_at: Option<DateTime<Utc>>,
}

/// Interface for storage providers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get the verification record of a user, if one exists
    async fn get_verification(
        &self,
        user_id: i64,
    ) -> Result<Option<UserVerification>, StorageError>;
    /// Create or update the record of a user with a new verification time
    async fn upsert_verification(
        &self,
        user_id: i64,
        verified_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    /// Null the verification time of every record, returning how many were cleared
    async fn clear_all_verifications(&self) -> Result<u64, StorageError>;
    /// Check connection to storage
    async fn check_connection(&self) -> Result<(), String>;
}

/// R2-backed storage implementation
pub struct R2Storage {
    client: Client,
    bucket: String,
    cache: Cache<String, Arc<Vec<u8>>>,
}

impl R2Storage {
    /// Create a new R2 storage instance
    ///
    /// # Errors
    ///
    /// Returns an error if R2 configuration is missing.
    pub async fn new(settings: &Settings) -> Result<Self, StorageError> {
        let endpoint_url = settings
            .r2_endpoint_url
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ENDPOINT_URL is missing".into()))?;
        let access_key = settings
            .r2_access_key_id
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ACCESS_KEY_ID is missing".into()))?;
        let secret_key = settings
            .r2_secret_access_key
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_SECRET_ACCESS_KEY is missing".into()))?;
        let bucket = settings
            .r2_bucket_name
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_BUCKET_NAME is missing".into()))?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "r2-storage");

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new("auto"))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(endpoint_url)
            .force_path_style(true)
            .build();

        let client = Client::from_conf(s3_config);

        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(10 * 60))
            .build();

        Ok(Self {
            client,
            bucket: bucket.clone(),
            cache,
        })
    }

    /// Save data as JSON to R2
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization or S3 upload fails.
    pub async fn save_json<T: serde::Serialize + Sync>(
        &self,
        key: &str,
        data: &T,
    ) -> Result<(), StorageError> {
        let body_bytes = serde_json::to_vec(data)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body_bytes.clone()))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StorageError::S3Put(e.to_string()))?;

        // Write-Through: only cache what the bucket accepted
        self.cache
            .insert(key.to_string(), Arc::new(body_bytes))
            .await;

        Ok(())
    }

    /// Load data from JSON in R2
    ///
    /// # Errors
    ///
    /// Returns an error if S3 download or JSON deserialization fails.
    pub async fn load_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        if let Some(cached_data) = self.cache.get(key).await {
            match serde_json::from_slice(&cached_data) {
                Ok(data) => return Ok(Some(data)),
                Err(e) => {
                    warn!("Cache deserialization failed for {}: {}", key, e);
                    self.cache.invalidate(key).await;
                }
            }
        }

        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
                    .into_bytes();

                let json_data = serde_json::from_slice(&data)?;

                // Read-Through: populate cache on miss
                self.cache
                    .insert(key.to_string(), Arc::new(data.to_vec()))
                    .await;

                Ok(Some(json_data))
            }
            Err(SdkError::ServiceError(err)) if err.err().is_no_such_key() => Ok(None),
            Err(e) => Err(StorageError::S3Get(Box::new(e))),
        }
    }

    /// List every object key under a prefix, following pagination
    ///
    /// # Errors
    ///
    /// Returns an error if any list request fails.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::S3List(e.to_string()))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl StorageProvider for R2Storage {
    async fn get_verification(
        &self,
        user_id: i64,
    ) -> Result<Option<UserVerification>, StorageError> {
        self.load_json(&verification_key(user_id)).await
    }

    async fn upsert_verification(
        &self,
        user_id: i64,
        verified_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let record = UserVerification {
            user_id,
            last_verified_at: Some(verified_at),
        };
        self.save_json(&verification_key(user_id), &record).await
    }

    /// Not atomic: a record written between the listing and its rewrite keeps
    /// whichever value lands last.
    async fn clear_all_verifications(&self) -> Result<u64, StorageError> {
        self.cache.invalidate_all();

        let keys = self.list_keys(VERIFICATION_PREFIX).await?;
        debug!("Resetting {} verification records", keys.len());

        let mut cleared = 0;
        for key in keys {
            let Some(mut record) = self.load_json::<UserVerification>(&key).await? else {
                continue;
            };
            if record.last_verified_at.take().is_some() {
                self.save_json(&key, &record).await?;
                cleared += 1;
            }
        }

        Ok(cleared)
    }

    /// Check access to the configured bucket
    async fn check_connection(&self) -> Result<(), String> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!("Successfully connected to R2 storage.");
                Ok(())
            }
            Err(e) => {
                let err_msg = format!("R2 connectivity test failed: {e:#?}");
                error!("{}", err_msg);
                Err(err_msg)
            }
        }
    }
}

/// Process-local storage, mainly for local runs and tests
#[derive(Default)]
pub struct InMemoryStorage {
    records: RwLock<HashMap<i64, UserVerification>>,
}

impl InMemoryStorage {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, including reset ones
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl StorageProvider for InMemoryStorage {
    async fn get_verification(
        &self,
        user_id: i64,
    ) -> Result<Option<UserVerification>, StorageError> {
        Ok(self.records.read().await.get(&user_id).cloned())
    }

    async fn upsert_verification(
        &self,
        user_id: i64,
        verified_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.records
            .write()
            .await
            .entry(user_id)
            .and_modify(|record| record.last_verified_at = Some(verified_at))
            .or_insert(UserVerification {
                user_id,
                last_verified_at: Some(verified_at),
            });
        Ok(())
    }

    async fn clear_all_verifications(&self) -> Result<u64, StorageError> {
        let mut records = self.records.write().await;
        let cleared = records
            .values_mut()
            .filter_map(|record| record.last_verified_at.take())
            .count();
        Ok(cleared as u64)
    }

    async fn check_connection(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Returns the R2 key for a user's verification record
#[must_use]
pub fn verification_key(user_id: i64) -> String {
    format!("{VERIFICATION_PREFIX}{user_id}.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_verification_key_layout() {
        assert_eq!(verification_key(42), "verifications/42.json");
        assert!(verification_key(-100).starts_with(VERIFICATION_PREFIX));
    }

    #[test]
    fn test_record_json_shape() -> Result<(), serde_json::Error> {
        let record: UserVerification =
            serde_json::from_str(r#"{"user_id": 42, "last_verified_at": null}"#)?;
        assert_eq!(record.user_id, 42);
        assert_eq!(record.last_verified_at, None);

        let at = Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).single();
        let record = UserVerification {
            user_id: 99,
            last_verified_at: at,
        };
        let json = serde_json::to_value(&record)?;
        assert_eq!(json["last_verified_at"], "2026-10-19T10:00:00Z");
        Ok(())
    }

    #[tokio::test]
    async fn test_in_memory_upsert_creates_then_updates() -> Result<(), StorageError> {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.get_verification(42).await?, None);

        let first = Utc::now();
        storage.upsert_verification(42, first).await?;
        let later = first + chrono::TimeDelta::minutes(5);
        storage.upsert_verification(42, later).await?;

        assert_eq!(storage.record_count().await, 1);
        let record = storage.get_verification(42).await?;
        assert_eq!(record.and_then(|r| r.last_verified_at), Some(later));
        Ok(())
    }

    #[tokio::test]
    async fn test_in_memory_clear_keeps_records() -> Result<(), StorageError> {
        let storage = InMemoryStorage::new();
        storage.upsert_verification(42, Utc::now()).await?;
        storage.upsert_verification(99, Utc::now()).await?;

        assert_eq!(storage.clear_all_verifications().await?, 2);
        assert_eq!(storage.record_count().await, 2);
        assert_eq!(
            storage.get_verification(42).await?,
            Some(UserVerification {
                user_id: 42,
                last_verified_at: None
            })
        );

        // Already cleared records are not counted again
        assert_eq!(storage.clear_all_verifications().await?, 0);
        Ok(())
    }
}
