//! HTTP server module
//!
//! A thin hyper adapter in front of the uploaders: one task per connection,
//! routing by path prefix, bodies streamed straight into [`crate::upload`].
//!
//! # Example
//!
//! ```no_run
//! use spool_uploadr::{config::Config, server::UploadServer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("config.yaml")?;
//! let server = UploadServer::bind(config).await?;
//! println!("Listening on {}", server.local_addr());
//! server.run_until(tokio::signal::ctrl_c()).await?;
//! # Ok(())
//! # }
//! ```

pub mod routes;

use crate::config::Config;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

pub use routes::{Route, RouteTable};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),
}

/// HTTP upload server
pub struct UploadServer {
    routes: Arc<RouteTable>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl UploadServer {
    /// Bind to the configured address and build one uploader per route.
    ///
    /// Port 0 lets the OS pick a port; see [`UploadServer::local_addr`].
    pub async fn bind(config: Config) -> Result<Self, ServerError> {
        let routes = RouteTable::from_config(&config);
        Self::bind_with_routes(&config.server.address, routes).await
    }

    /// Bind with an explicit route table
    pub async fn bind_with_routes(address: &str, routes: RouteTable) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!("Server bound to {} with {} route(s)", local_addr, routes.len());

        Ok(Self {
            routes: Arc::new(routes),
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the task is dropped
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Serve until `shutdown` resolves.
    ///
    /// In-flight connections keep running on their own tasks.
    pub async fn run_until<F, T>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = T>,
    {
        info!("Starting upload server on {}", self.local_addr);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down server");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let routes = Arc::clone(&self.routes);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service =
                    service_fn(move |req| routes::handle_request(req, Arc::clone(&routes)));

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MetricsConfig, NamingStrategy, RouteConfig, ServerConfig};

    fn test_config(address: &str) -> Config {
        Config {
            server: ServerConfig {
                address: address.into(),
                read_timeout_secs: None,
            },
            routes: vec![RouteConfig {
                name: "test".into(),
                path_prefix: "/upload".into(),
                upload_dir: std::env::temp_dir().join("spool-server-test"),
                temp_dir: None,
                max_size: None,
                type_suffix: None,
                naming: NamingStrategy::Random,
            }],
            metrics: MetricsConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_server_bind() {
        let server = UploadServer::bind(test_config("127.0.0.1:0")).await.unwrap();
        assert!(server.local_addr().port() > 0);
    }

    #[tokio::test]
    async fn test_server_invalid_address() {
        let result = UploadServer::bind(test_config("invalid")).await;
        assert!(matches!(result, Err(ServerError::BindError(_))));
    }

    #[tokio::test]
    async fn test_run_until_returns_on_shutdown() {
        let server = UploadServer::bind(test_config("127.0.0.1:0")).await.unwrap();
        server.run_until(async {}).await.unwrap();
    }
}
