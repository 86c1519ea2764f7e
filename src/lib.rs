//! # checkmate
//!
//! Incremental ingestion of top chess players' games from a public,
//! rate-limited API into object storage, and from there into a warehouse.
//!
//! Two pipelines share one object store:
//!
//! ```text
//! ┌──────────┐   ingest   ┌──────────────┐   load   ┌─────────────┐
//! │ Chess API│──────────▶│ Object store │────────▶│  Warehouse  │
//! └──────────┘            │ player/…     │          │ games       │
//!                         │ leaderboards/│          │ loading_    │
//!                         └──────────────┘          │  completed  │
//!                                                   └─────────────┘
//! ```
//!
//! Both pipelines are idempotent. Durable state is the ledger: an artifact in
//! the bucket means its unit has been fetched, and a row in
//! `loading_completed` means its artifact has been loaded. A run only does
//! the set difference between what should exist and what does.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`settings`] | Per-run settings and the scheduler message |
//! | [`models`] | Core data types |
//! | [`error`] | Typed domain errors |
//! | [`enumerate`] | Month ranges, rosters and fetch units |
//! | [`fetch`] | HTTP fetching with retry and backoff |
//! | [`ledger`] | Set differences against durable state |
//! | [`transform`] | Raw artifacts to game records |
//! | [`reconcile`] | Filtering and deduplication against the warehouse |
//! | [`commit`] | Ordered append-then-cleanup |
//! | [`store`] | Object storage backends |
//! | [`warehouse`] | Warehouse backends |
//! | [`secrets`] | Secret lookup |
//! | [`migrate`] | Warehouse schema bootstrap |
//! | [`ingest`] | Ingestion pipeline |
//! | [`load`] | Load pipeline |
//! | [`monitor`] | Run trigger and failure rows |
//! | [`context`] | Capability wiring for a run |
//! | [`db`] | SQLite connection |

pub mod commit;
pub mod config;
pub mod context;
pub mod db;
pub mod enumerate;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod ledger;
pub mod load;
pub mod migrate;
pub mod models;
pub mod monitor;
pub mod reconcile;
pub mod secrets;
pub mod settings;
pub mod store;
pub mod transform;
pub mod warehouse;

pub use error::Error;
