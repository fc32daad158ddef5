//! `Dragonfly` (Redis-compatible) cache backend.
//!
//! `Dragonfly` is the shared cache in front of the record store. Every
//! process serving submissions talks to the same instance, so cache state is
//! shared without any locking on the core's side. Key patterns are owned by
//! the record cache in `roster-core`:
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `{prefix}:epoch` | Integer | Cache generation, bumped by invalidate-all |
//! | `{prefix}:{epoch}:window:{sort}:{start}` | JSON | One cached window |
//! | `{prefix}:{epoch}:member:{id}` | Set | Windows (of any sort) containing a record |
//! | `{prefix}:{epoch}:record:{id}` | JSON | Individually cached record |
//! | `{prefix}:stale:{id}` | String | Stale marker written after a commit |

use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::*;
use fred::types::Expiration;

use crate::cache_backend::{CacheBackend, ttl_millis};
use crate::error::DbError;

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
///
/// Wraps a [`fred::prelude::Client`] and exposes the [`CacheBackend`]
/// operations the record cache relies on.
#[derive(Clone)]
pub struct DragonflyPool {
    client: Client,
}

impl DragonflyPool {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let config = Config::from_url(url)
            .map_err(|e| DbError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }
}

#[async_trait]
impl CacheBackend for DragonflyPool {
    async fn get(&self, key: &str) -> Result<Option<String>, DbError> {
        let value: Option<String> = self.client.get(key).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DbError> {
        let _: () = self
            .client
            .set(key, value, Some(Expiration::PX(ttl_millis(ttl))), None, false)
            .await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), DbError> {
        if keys.is_empty() {
            return Ok(());
        }
        let _: i64 = self.client.del(keys.to_vec()).await?;
        Ok(())
    }

    async fn add_member(&self, key: &str, member: &str, ttl: Duration) -> Result<(), DbError> {
        let _: i64 = self.client.sadd(key, member).await?;
        let _: bool = self.client.pexpire(key, ttl_millis(ttl), None).await?;
        Ok(())
    }

    async fn members(&self, key: &str) -> Result<Vec<String>, DbError> {
        let members: Vec<String> = self.client.smembers(key).await?;
        Ok(members)
    }

    async fn increment(&self, key: &str) -> Result<i64, DbError> {
        let value: i64 = self.client.incr(key).await?;
        Ok(value)
    }
}
