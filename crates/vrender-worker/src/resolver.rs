//! Payload resolution.
//!
//! Turns a job's payload source into a validated [`RenderSpec`]. Remote
//! payloads are fetched with a timeout and a hard size cap; their content is
//! only ever parsed as render data.

use std::time::{Duration, Instant};

use tracing::debug;
use url::Url;
use vrender_models::{PayloadSource, RenderSpec};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// Fetches and validates job payloads.
#[derive(Debug, Clone)]
pub struct PayloadResolver {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

impl PayloadResolver {
    pub fn new(timeout: Duration, max_bytes: usize) -> WorkerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkerError::config_error(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout,
            max_bytes,
        })
    }

    pub async fn resolve(&self, source: &PayloadSource) -> WorkerResult<RenderSpec> {
        match source {
            PayloadSource::Inline(value) => {
                RenderSpec::from_value(value).map_err(|e| WorkerError::payload_invalid(e.to_string()))
            }
            PayloadSource::Remote(url) => {
                let started = Instant::now();
                let body = self.fetch(url).await;
                metrics::record_payload_fetch_duration(started.elapsed().as_secs_f64());

                RenderSpec::from_slice(&body?).map_err(|e| WorkerError::payload_invalid(e.to_string()))
            }
        }
    }

    async fn fetch(&self, url: &Url) -> WorkerResult<Vec<u8>> {
        debug!(url = %url, "Fetching payload");

        let mut response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                WorkerError::payload_fetch(
                    format!("GET {} timed out after {}s", url, self.timeout.as_secs()),
                    None,
                )
            } else {
                WorkerError::payload_fetch(format!("GET {} failed: {}", url, e), None)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::payload_fetch(
                format!("GET {} returned {}", url, status),
                Some(status.as_u16()),
            ));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes as u64 {
                return Err(self.too_large(url));
            }
        }

        let mut body = Vec::new();
        loop {
            let chunk = response.chunk().await.map_err(|e| {
                if e.is_timeout() {
                    WorkerError::payload_fetch(
                        format!("reading {} timed out after {}s", url, self.timeout.as_secs()),
                        None,
                    )
                } else {
                    WorkerError::payload_fetch(format!("reading {} failed: {}", url, e), None)
                }
            })?;
            let Some(chunk) = chunk else {
                break;
            };
            if body.len() + chunk.len() > self.max_bytes {
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url = %url, bytes = body.len(), "Payload fetched");
        Ok(body)
    }

    fn too_large(&self, url: &Url) -> WorkerError {
        WorkerError::payload_fetch(
            format!("payload at {} exceeds the {} byte limit", url, self.max_bytes),
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver() -> PayloadResolver {
        PayloadResolver::new(Duration::from_secs(5), 1024).unwrap()
    }

    async fn serve(template: ResponseTemplate) -> (MockServer, Url) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payload.json"))
            .respond_with(template)
            .mount(&server)
            .await;
        let url = Url::parse(&format!("{}/payload.json", server.uri())).unwrap();
        (server, url)
    }

    #[tokio::test]
    async fn test_inline_payload() {
        let spec = resolver()
            .resolve(&PayloadSource::Inline(json!({"text": "hello"})))
            .await
            .unwrap();
        assert!(spec.is_empty());
    }

    #[tokio::test]
    async fn test_inline_payload_invalid() {
        let err = resolver()
            .resolve(&PayloadSource::Inline(json!({"output": {"width": 3}})))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::PayloadInvalid(_)));
    }

    #[tokio::test]
    async fn test_remote_payload() {
        let body = json!({"output": {"width": 1280, "height": 720}});
        let (_server, url) = serve(ResponseTemplate::new(200).set_body_json(body)).await;

        let spec = resolver().resolve(&PayloadSource::Remote(url)).await.unwrap();
        assert_eq!(spec.output.width, 1280);
    }

    #[tokio::test]
    async fn test_remote_server_error() {
        let (_server, url) = serve(ResponseTemplate::new(500)).await;

        let err = resolver().resolve(&PayloadSource::Remote(url)).await.unwrap_err();
        assert!(matches!(err, WorkerError::PayloadFetch { status: Some(500), .. }));
    }

    #[tokio::test]
    async fn test_remote_payload_too_large() {
        let body = format!("{{\"pad\": \"{}\"}}", "x".repeat(4096));
        let (_server, url) = serve(ResponseTemplate::new(200).set_body_string(body)).await;

        let err = resolver().resolve(&PayloadSource::Remote(url)).await.unwrap_err();
        match err {
            WorkerError::PayloadFetch { message, status } => {
                assert!(message.contains("byte limit"));
                assert_eq!(status, None);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remote_payload_not_json() {
        let (_server, url) = serve(ResponseTemplate::new(200).set_body_string("<html>")).await;

        let err = resolver().resolve(&PayloadSource::Remote(url)).await.unwrap_err();
        assert!(matches!(err, WorkerError::PayloadInvalid(_)));
    }

    #[tokio::test]
    async fn test_remote_timeout() {
        let template = ResponseTemplate::new(200)
            .set_body_json(json!({}))
            .set_delay(Duration::from_secs(3));
        let (_server, url) = serve(template).await;

        let resolver = PayloadResolver::new(Duration::from_millis(200), 1024).unwrap();
        let err = resolver.resolve(&PayloadSource::Remote(url)).await.unwrap_err();
        assert!(matches!(err, WorkerError::PayloadFetch { status: None, .. }));
    }
}
