//! # EmberKV - An In-Memory Key-Value Server
//!
//! EmberKV speaks a Redis-style request/reply protocol over TCP and keeps
//! string and list values in memory, with per-key expiry and whole-store
//! snapshots on disk.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                             EmberKV                               │
//! │                                                                   │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐            │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │            │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │            │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘            │
//! │                            │                  │                   │
//! │                     ┌──────▼──────┐    ┌──────▼───────────────┐   │
//! │                     │   Request   │    │        Store         │   │
//! │                     │   Parser    │    │ RwLock<HashMap<..>>  │   │
//! │                     └─────────────┘    └──────▲───────▲───────┘   │
//! │                                               │       │           │
//! │                              ┌────────────────┘       │           │
//! │                     ┌────────┴────────┐     ┌─────────┴────────┐  │
//! │                     │  ExpirySweeper  │     │   Snapshotter    │  │
//! │                     │ (tokio task)    │     │ (SAVE, shutdown) │  │
//! │                     └─────────────────┘     └──────────────────┘  │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use emberkv::commands::CommandHandler;
//! use emberkv::connection::handle_connection;
//! use emberkv::persistence::Snapshotter;
//! use emberkv::storage::start_expiry_sweeper;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let snapshotter = Arc::new(Snapshotter::new("backup.rdb"));
//!     let store = Arc::new(snapshotter.load()?);
//!     let _sweeper = start_expiry_sweeper(Arc::clone(&store));
//!
//!     let handler = CommandHandler::new(store, snapshotter);
//!     let listener = TcpListener::bind("127.0.0.1:6349").await?;
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         tokio::spawn(handle_connection(stream, addr, handler.clone()));
//!     }
//! }
//! ```
//!
//! ## Expiry
//!
//! Keys with a TTL are removed in two ways:
//! 1. **Passive**: a read that finds an expired key deletes it and reports a miss
//! 2. **Active**: a background task samples keys with a TTL and deletes the
//!    expired ones, repeating while the expired fraction stays high
//!
//! ## Module Overview
//!
//! - [`protocol`]: request parser and reply serializer
//! - [`storage`]: the keyspace and the expiry sweeper
//! - [`commands`]: command dispatch and SET option handling
//! - [`persistence`]: snapshot save and load
//! - [`connection`]: per-client read/execute/reply loop

pub mod commands;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod storage;

pub use commands::CommandHandler;
pub use connection::handle_connection;
pub use persistence::Snapshotter;
pub use protocol::{ParseError, RespParser, RespValue};
pub use storage::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, Store};

/// The default port EmberKV listens on
pub const DEFAULT_PORT: u16 = 6349;

/// The default host EmberKV binds to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
