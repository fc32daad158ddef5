//! Data layer for the Roster record database (`PostgreSQL` + `Dragonfly`).
//!
//! `PostgreSQL` is the durable record store and holds the field registry.
//! `Dragonfly` is the shared cache that sits in front of it. Both sit behind
//! traits so the submission pipeline can run against in-memory backends in
//! tests and against the real services in production.
//!
//! # Architecture
//!
//! ```text
//! Submission pipeline (roster-core)
//!     |
//!     +-- RecordStore ----> PgRecordStore      (records table)
//!     |                +--> MemoryRecordStore
//!     |
//!     +-- CacheBackend ---> DragonflyPool      (shared cache)
//!     |                +--> MemoryCacheBackend
//!     |
//!     +-- FieldStore -----> fields table       (field registry)
//! ```
//!
//! # Modules
//!
//! - [`record_store`] -- [`RecordStore`] trait and the `PostgreSQL` store
//! - [`memory_store`] -- In-memory record store
//! - [`cache_backend`] -- [`CacheBackend`] trait and the in-memory backend
//! - [`dragonfly`] -- `Dragonfly` (Redis-compatible) cache backend
//! - [`field_store`] -- Field registry table
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`error`] -- Shared error types

pub mod cache_backend;
pub mod dragonfly;
pub mod error;
pub mod field_store;
pub mod memory_store;
pub mod postgres;
pub mod record_store;

// Re-export primary types for convenience.
pub use cache_backend::{CacheBackend, MemoryCacheBackend};
pub use dragonfly::DragonflyPool;
pub use error::DbError;
pub use field_store::{FieldRow, FieldStore};
pub use memory_store::MemoryRecordStore;
pub use postgres::{PostgresConfig, PostgresPool};
pub use record_store::{PgRecordStore, RecordRow, RecordStore, validate_field_name};
