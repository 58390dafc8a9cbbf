#![allow(clippy::return_self_not_must_use)]
#![doc = include_str!("../README.md")]

//! # Bitroute
//!
//! An embeddable HTTP request router built on hyper.
//!
//! ## Features
//! - Static, named (`:name`) and wildcard (`*`) path segments
//! - Specificity-ordered matching: static segments beat named ones
//! - Automatic 404 / 405 (with `Allow`) and optional OPTIONS replies
//! - Panic recovery hook and a single global middleware
//! - gzip and JSON response writing through [`Control`]
//! - Synchronous handlers on a configurable thread pool
//!
//! ## Example
//! ```no_run
//! use bitroute::{Control, Router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), bitroute::Error> {
//!     let mut router = Router::new();
//!     router.get("/hello/:name", |c: &mut Control| {
//!         let greeting = format!("Hello {}", c.query(":name"));
//!         c.write(greeting);
//!     });
//!     router.listen("127.0.0.1:8080").await
//! }
//! ```
//!
//! ## Architecture
//! - [`Registry`]: route table for one method
//! - [`Router`]: per-method registries plus the not-found, not-allowed and
//!   recovery hooks
//! - [`Control`]: per-request context handed to handlers
//! - [`Server`]: tokio accept loop and hyper connections; handlers run on a
//!   worker pool
//!
//! ## Configuration
//! Server settings can be configured via:
//! - Environment variables (prefixed with `BITROUTE_`)
//! - Configuration file (`config.toml`)
//! - Builder pattern API
//!
//! ## Features
//! - `http2`: Enables HTTP/2 support (enabled by default)

pub use crate::config::{LogLevel, ServerConfig};
pub use crate::control::{Control, Json, Payload};
pub use crate::error::{Error, ExecutorError, ServeError};
pub use crate::handler::{handler_fn, Handler, Middleware, SharedHandler};
pub use crate::http::{Body, BodyReader, Bytes, Request, Response, ResponseBuilder};
pub use crate::path::{split, MAX_DEPTH};
pub use crate::probes::{Probes, Status};
pub use crate::registry::{Matched, Param, Registry};
pub use crate::router::Router;
pub use crate::server::{ConnectionInfo, Server, Service};

mod config;
mod control;
mod error;
mod executor;
mod handler;
mod http;
pub mod lifecycle;
pub mod logger;
mod path;
pub mod probes;
mod registry;
mod router;
mod server;

// Re-export common types
pub use hyper;
