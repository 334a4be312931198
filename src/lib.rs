//! Spool Uploadr Library
//!
//! Streams HTTP request bodies to disk with size limits and atomic placement.
//!
//! # Features
//!
//! - **Streaming**: bodies are written chunk by chunk, never buffered whole
//! - **Size Policy**: declared `content-length` checked up front, actual
//!   bytes checked on every chunk
//! - **Atomic Placement**: finished files are linked into the upload
//!   directory and never overwrite an existing file
//! - **Cleanup**: partial temp files are removed on every failure path,
//!   cancellation included
//!
//! # Example
//!
//! ```no_run
//! use spool_uploadr::{config::Config, server::UploadServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = UploadServer::bind(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod metrics;
pub mod server;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use server::UploadServer;
pub use upload::{UploadError, UploadResult, Uploader, UploaderConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
