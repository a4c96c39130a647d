//! Verification lifecycle
//!
//! A user is verified for a fixed window after completing the shortened-link
//! redirect. The window is checked against the stored timestamp on every read.

use crate::config::VERIFICATION_WINDOW_SECS;
use crate::storage::{StorageError, StorageProvider};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors surfaced by the verification service
#[derive(Error, Debug)]
pub enum VerificationError {
    /// The backing store could not be read or written
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),
}

/// Decides whether a user may currently receive gated content.
#[derive(Clone)]
pub struct VerificationService {
    storage: Arc<dyn StorageProvider>,
    window: TimeDelta,
}

impl VerificationService {
    /// Create a service with the default 3-hour window
    #[must_use]
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self::with_window(storage, TimeDelta::seconds(VERIFICATION_WINDOW_SECS))
    }

    /// Create a service with a custom window
    #[must_use]
    pub fn with_window(storage: Arc<dyn StorageProvider>, window: TimeDelta) -> Self {
        Self { storage, window }
    }

    /// Configured verification window
    #[must_use]
    pub const fn window(&self) -> TimeDelta {
        self.window
    }

    /// Whether `user_id` is verified right now.
    ///
    /// # Errors
    ///
    /// Returns `VerificationError::StorageUnavailable` if the record cannot be read.
    pub async fn is_verified(&self, user_id: i64) -> Result<bool, VerificationError> {
        self.is_verified_at(user_id, Utc::now()).await
    }

    /// Whether `user_id` is verified at instant `now`.
    ///
    /// # Errors
    ///
    /// Returns `VerificationError::StorageUnavailable` if the record cannot be read.
    pub async fn is_verified_at(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, VerificationError> {
        let last_verified_at = self
            .storage
            .get_verification(user_id)
            .await?
            .and_then(|record| record.last_verified_at);

        let verified = last_verified_at.is_some_and(|at| within_window(at, now, self.window));
        debug!("User {user_id} verified: {verified} (last: {last_verified_at:?})");
        Ok(verified)
    }

    /// Record a completed redirect for `user_id` at the current time.
    ///
    /// # Errors
    ///
    /// Returns `VerificationError::StorageUnavailable` if the write fails.
    pub async fn record_verification(&self, user_id: i64) -> Result<(), VerificationError> {
        self.record_verification_at(user_id, Utc::now()).await
    }

    /// Record a completed redirect for `user_id` at instant `at`.
    ///
    /// # Errors
    ///
    /// Returns `VerificationError::StorageUnavailable` if the write fails.
    pub async fn record_verification_at(
        &self,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), VerificationError> {
        self.storage.upsert_verification(user_id, at).await?;
        info!("Recorded verification for user {user_id} at {at}");
        Ok(())
    }

    /// Revoke every user's verification at once.
    ///
    /// # Errors
    ///
    /// Returns `VerificationError::StorageUnavailable` if the bulk update fails.
    pub async fn reset_all(&self) -> Result<u64, VerificationError> {
        let cleared = self.storage.clear_all_verifications().await?;
        info!("Reset verification for {cleared} users");
        Ok(cleared)
    }
}

/// `now - at < window`, with no skew tolerance.
#[must_use]
pub fn within_window(at: DateTime<Utc>, now: DateTime<Utc>, window: TimeDelta) -> bool {
    now.signed_duration_since(at) < window
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryStorage, MockStorageProvider, UserVerification};

    fn service() -> VerificationService {
        VerificationService::new(Arc::new(InMemoryStorage::new()))
    }

    #[tokio::test]
    async fn test_never_recorded_is_not_verified() -> Result<(), VerificationError> {
        assert!(!service().is_verified(42).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_recorded_is_verified_immediately() -> Result<(), VerificationError> {
        let service = service();
        service.record_verification(42).await?;
        assert!(service.is_verified(42).await?);
        assert!(!service.is_verified(43).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_window_boundary_is_exclusive() -> Result<(), VerificationError> {
        let service = service();
        let t0 = Utc::now();
        service.record_verification_at(42, t0).await?;

        let window = service.window();
        assert!(service.is_verified_at(42, t0 + TimeDelta::minutes(1)).await?);
        assert!(
            service
                .is_verified_at(42, t0 + window - TimeDelta::milliseconds(1))
                .await?
        );
        assert!(!service.is_verified_at(42, t0 + window).await?);
        assert!(!service.is_verified_at(42, t0 + TimeDelta::minutes(181)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_rerecording_refreshes_window() -> Result<(), VerificationError> {
        let service = service();
        let t0 = Utc::now();
        service.record_verification_at(42, t0).await?;
        service
            .record_verification_at(42, t0 + TimeDelta::hours(2))
            .await?;
        assert!(service.is_verified_at(42, t0 + TimeDelta::hours(4)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_revokes_everyone() -> Result<(), VerificationError> {
        let service = service();
        service.record_verification(42).await?;
        service.record_verification(99).await?;

        assert_eq!(service.reset_all().await?, 2);
        assert!(!service.is_verified(42).await?);
        assert!(!service.is_verified(99).await?);
        assert!(!service.is_verified(7).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_null_timestamp_is_not_verified() -> Result<(), VerificationError> {
        let mut mock = MockStorageProvider::new();
        mock.expect_get_verification().returning(|user_id| {
            Ok(Some(UserVerification {
                user_id,
                last_verified_at: None,
            }))
        });
        let service = VerificationService::new(Arc::new(mock));
        assert!(!service.is_verified(42).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_storage_failure_is_distinguishable() {
        let mut mock = MockStorageProvider::new();
        mock.expect_get_verification()
            .returning(|_| Err(StorageError::S3List("bucket offline".to_string())));
        mock.expect_upsert_verification()
            .returning(|_, _| Err(StorageError::S3Put("bucket offline".to_string())));
        let service = VerificationService::new(Arc::new(mock));

        assert!(matches!(
            service.is_verified(42).await,
            Err(VerificationError::StorageUnavailable(_))
        ));
        assert!(matches!(
            service.record_verification(42).await,
            Err(VerificationError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn test_future_timestamp_counts_as_verified() {
        let now = Utc::now();
        assert!(within_window(
            now + TimeDelta::minutes(5),
            now,
            TimeDelta::hours(3)
        ));
    }
}
