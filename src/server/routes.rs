//! Route table and request handling
//!
//! Turns an HTTP request into a [`RequestMeta`] plus a body stream, hands
//! both to the route's [`UploadHandler`], and turns the outcome back into a
//! response. Status codes come straight from [`UploadError::status_code`].

use crate::config::Config;
use crate::upload::{
    BodyStream, ClientClose, RequestMeta, UploadError, UploadHandler, Uploader,
};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use tracing::{error, info, warn};

/// An upload endpoint
pub struct Route {
    pub name: String,
    prefix: String,
    handler: Arc<dyn UploadHandler>,
}

impl Route {
    pub fn new(name: impl Into<String>, prefix: &str, handler: Arc<dyn UploadHandler>) -> Self {
        let trimmed = prefix.trim_end_matches('/');
        Self {
            name: name.into(),
            prefix: if trimmed.is_empty() { "/".into() } else { trimmed.into() },
            handler,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Path below the prefix if `path` falls under this route
    fn sub_path<'p>(&self, path: &'p str) -> Option<&'p str> {
        if self.prefix == "/" {
            return path.strip_prefix('/');
        }
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() {
            Some(rest)
        } else {
            rest.strip_prefix('/')
        }
    }
}

/// All configured routes
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// One [`Uploader`] per configured route
    pub fn from_config(config: &Config) -> Self {
        let routes = config
            .routes
            .iter()
            .map(|route| {
                let uploader = Uploader::new(route.uploader_config(&config.server));
                Route::new(&route.name, &route.path_prefix, Arc::new(uploader))
            })
            .collect();
        Self::new(routes)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Longest matching prefix, on `/` boundaries, and the path below it
    pub fn resolve<'p>(&self, path: &'p str) -> Option<(&Route, &'p str)> {
        self.routes
            .iter()
            .filter_map(|route| route.sub_path(path).map(|sub| (route, sub)))
            .max_by_key(|(route, _)| route.prefix.len())
    }
}

/// Handle one HTTP request
///
/// * `GET /health` - liveness probe
/// * `POST|PUT {prefix}[/sub/path]` - stream the body into the route's uploader
pub async fn handle_request<B>(
    req: Request<B>,
    table: Arc<RouteTable>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: StdError + Send + Sync + 'static,
{
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    info!("Handling {} {}", method, path);

    if path == "/health" && method == Method::GET {
        return Ok(text(StatusCode::OK, "ok"));
    }

    let Some((route, sub_path)) = table.resolve(&path) else {
        info!("No route configured for path: {}", path);
        return Ok(text(StatusCode::NOT_FOUND, "Not Found"));
    };

    if method != Method::POST && method != Method::PUT {
        let mut response = text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("POST, PUT"));
        return Ok(response);
    }

    let meta = RequestMeta::new(req.headers().clone(), sub_path);
    let body = body_stream(req.into_body());

    match route.handler.upload(&meta, body).await {
        Ok(result) => match serde_json::to_vec(&result) {
            Ok(json) => {
                let mut response = Response::new(Full::new(Bytes::from(json)));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Ok(response)
            }
            Err(e) => {
                error!(route = %route.name, error = %e, "Failed to encode upload result");
                Ok(text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"))
            }
        },
        Err(e) => Ok(error_response(&route.name, &e)),
    }
}

/// Map an upload failure to a response, keeping status and message
pub fn error_response(route: &str, e: &UploadError) -> Response<Full<Bytes>> {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() {
        error!(route = %route, error = %e, "Upload failed");
    } else {
        warn!(route = %route, status = status.as_u16(), error = %e, "Upload rejected");
    }

    text(status, &e.to_string())
}

/// Adapt an HTTP body into the uploader's chunk stream
pub fn body_stream<B>(body: B) -> BodyStream
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: StdError + Send + Sync + 'static,
{
    body.into_data_stream()
        .map_err(|e| classify_body_error(&e))
        .boxed()
}

/// Decide whether a transport error means the client went away
pub fn classify_body_error(e: &(dyn StdError + 'static)) -> UploadError {
    let mut source: Option<&(dyn StdError + 'static)> = Some(e);

    while let Some(err) = source {
        if let Some(hyper_err) = err.downcast_ref::<hyper::Error>() {
            if hyper_err.is_timeout() {
                return UploadError::ClientClosedRequest(ClientClose::TimedOut);
            }
            if hyper_err.is_incomplete_message() || hyper_err.is_canceled() || hyper_err.is_closed()
            {
                return UploadError::ClientClosedRequest(ClientClose::Aborted);
            }
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::TimedOut => {
                    return UploadError::ClientClosedRequest(ClientClose::TimedOut)
                }
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof => {
                    return UploadError::ClientClosedRequest(ClientClose::Aborted)
                }
                _ => {}
            }
        }
        source = err.source();
    }

    UploadError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("Failed to read request body: {}", e),
    ))
}

fn text(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::copy_from_slice(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
