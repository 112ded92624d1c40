//! memscope daemon - remote memory-introspection server
//!
//! This crate provides the server side of memscope:
//! - `config` - listen address, challenge key and limits
//! - `registry` - actor owning every attached process and its watch tree
//! - `server` - TCP listener, per-connection framing and command dispatch
//! - `app` - the `memscoped` command-line entry point
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      memscoped                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ MemscopeServer  │────▶│     RegistryActor           │   │
//! │  │     (TCP)       │     │ (processes + watch trees)   │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ connections                 │ events            │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ConnectionHandler│     │   broadcast::Sender         │   │
//! │  │  + Dispatcher   │     │   (viewers, --json)         │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod app;
pub mod config;
pub mod registry;
pub mod server;

pub use config::{ConfigError, ServerConfig};
pub use registry::{spawn_registry, RegistryError, RegistryHandle, WatchEvent};
pub use server::{MemscopeServer, ServerError};
