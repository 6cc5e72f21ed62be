//! Minimal HTTP/1 client used by the load balancer to reach workers.
//!
//! One connection per request over `hyper::client::conn::http1`, with an
//! optional deadline on the whole exchange.

use std::time::Duration;

use bytes::Bytes;
use http::header::{HOST, USER_AGENT};
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

const CLIENT_AGENT: &str = concat!("hotfn/", env!("CARGO_PKG_VERSION"));

/// Failures talking to a worker node.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid node url '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("node unreachable at {url}: {message}")]
    NodeUnreachable { url: String, message: String },

    #[error("bad response from {url}: {message}")]
    UpstreamBadResponse { url: String, message: String },

    #[error("request to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },
}

/// A fully read upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub url: String,
    pub status: StatusCode,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_slice(&self.body).map_err(|e| ClientError::UpstreamBadResponse {
            url: self.url.clone(),
            message: format!("status {}: {e}", self.status),
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_string()
    }
}

/// `GET url`, reading the whole body. `timeout` bounds the entire exchange.
pub async fn get(url: &str, timeout: Option<Duration>) -> Result<UpstreamResponse, ClientError> {
    match timeout {
        Some(after) => tokio::time::timeout(after, get_inner(url))
            .await
            .map_err(|_| ClientError::Timeout {
                url: url.to_string(),
                after,
            })?,
        None => get_inner(url).await,
    }
}

async fn get_inner(url: &str) -> Result<UpstreamResponse, ClientError> {
    let invalid = |message: String| ClientError::InvalidUrl {
        url: url.to_string(),
        message,
    };
    let unreachable = |message: String| ClientError::NodeUnreachable {
        url: url.to_string(),
        message,
    };

    let uri: Uri = url.parse().map_err(|e: http::uri::InvalidUri| invalid(e.to_string()))?;
    if uri.scheme_str() != Some("http") {
        return Err(invalid("only http:// is supported".to_string()));
    }
    let authority = uri
        .authority()
        .ok_or_else(|| invalid("missing host".to_string()))?
        .clone();
    let address = format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80));
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let stream = TcpStream::connect(&address)
        .await
        .map_err(|e| unreachable(e.to_string()))?;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| unreachable(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "worker connection closed with error");
        }
    });

    let req = Request::builder()
        .method(Method::GET)
        .uri(path)
        .header(HOST, authority.as_str())
        .header(USER_AGENT, CLIENT_AGENT)
        .body(Empty::<Bytes>::new())
        .map_err(|e| invalid(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| unreachable(e.to_string()))?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| ClientError::UpstreamBadResponse {
            url: url.to_string(),
            message: e.to_string(),
        })?
        .to_bytes();

    debug!(%url, %status, bytes = body.len(), "worker responded");
    Ok(UpstreamResponse {
        url: url.to_string(),
        status,
        body,
    })
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::routing::get as get_route;

    use super::*;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn get_reads_status_and_body() {
        let base = serve(Router::new().route("/ping", get_route(|| async { "pong" }))).await;

        let resp = get(&format!("{base}/ping"), None).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.text(), "pong");

        let resp = get(&format!("{base}/missing"), None).await.unwrap();
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unreachable_node_is_reported() {
        // Bind and drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = get(&format!("http://{addr}/execute"), None).await.unwrap_err();
        assert!(matches!(err, ClientError::NodeUnreachable { .. }));
    }

    #[tokio::test]
    async fn slow_node_times_out() {
        let base = serve(Router::new().route(
            "/slow",
            get_route(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;

        let err = get(&format!("{base}/slow"), Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
    }

    #[tokio::test]
    async fn rejects_non_http_urls() {
        let err = get("https://10.0.0.1/execute", None).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl { .. }));
    }

    #[test]
    fn json_decode_failure_is_bad_response() {
        let resp = UpstreamResponse {
            url: "http://w/execute".to_string(),
            status: StatusCode::OK,
            body: Bytes::from_static(b"not json"),
        };
        let err = resp.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, ClientError::UpstreamBadResponse { .. }));
    }
}
