//! Render submissions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::JobId;

/// Maximum length of a payload URL.
const MAX_URL_LENGTH: usize = 2048;

/// Maximum length of an output file name.
const MAX_FILENAME_LENGTH: usize = 255;

/// `POST /render` body as received from clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RenderRequest {
    /// Inline render payload
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// Remote payload to fetch
    #[serde(default)]
    pub payload_url: Option<String>,
    /// Requested output file name
    #[serde(default)]
    pub output_filename: Option<String>,
}

/// Reasons a submission is rejected before a job is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Provide either 'payload' or 'payload_url'")]
    MissingPayload,

    #[error("Provide only one of 'payload' or 'payload_url'")]
    AmbiguousPayload,

    #[error("'payload' must be a JSON object")]
    PayloadNotObject,

    #[error("Invalid payload_url: {0}")]
    InvalidUrl(String),

    #[error("Invalid output_filename: {0}")]
    InvalidFilename(String),
}

/// Where the render specification comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSource {
    Inline(serde_json::Value),
    Remote(Url),
}

/// A validated submission, stored on the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobRequest {
    pub source: PayloadSource,
    /// Requested output file name (defaults to `{job_id}.mp4`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_filename: Option<String>,
}

impl JobRequest {
    pub fn inline(payload: serde_json::Value, output_filename: Option<String>) -> Self {
        Self {
            source: PayloadSource::Inline(payload),
            output_filename,
        }
    }

    pub fn remote(url: Url, output_filename: Option<String>) -> Self {
        Self {
            source: PayloadSource::Remote(url),
            output_filename,
        }
    }

    /// Output file name for the given job.
    pub fn output_filename_for(&self, id: &JobId) -> String {
        self.output_filename
            .clone()
            .unwrap_or_else(|| format!("{}.mp4", id))
    }
}

impl RenderRequest {
    /// Validate the body structure and convert into a [`JobRequest`].
    ///
    /// Only the envelope is checked here. The payload contents are validated
    /// by the worker once the job runs.
    pub fn validate(self) -> Result<JobRequest, RequestError> {
        let output_filename = match self.output_filename {
            Some(name) => {
                let name = name.trim().to_string();
                if !is_valid_output_filename(&name) {
                    return Err(RequestError::InvalidFilename(name));
                }
                Some(name)
            }
            None => None,
        };

        let payload = self.payload.filter(|p| !p.is_null());
        let payload_url = self
            .payload_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        let source = match (payload, payload_url) {
            (None, None) => return Err(RequestError::MissingPayload),
            (Some(_), Some(_)) => return Err(RequestError::AmbiguousPayload),
            (Some(payload), None) => {
                if !payload.is_object() {
                    return Err(RequestError::PayloadNotObject);
                }
                PayloadSource::Inline(payload)
            }
            (None, Some(url)) => PayloadSource::Remote(parse_payload_url(&url)?),
        };

        Ok(JobRequest {
            source,
            output_filename,
        })
    }
}

fn parse_payload_url(raw: &str) -> Result<Url, RequestError> {
    if raw.len() > MAX_URL_LENGTH {
        return Err(RequestError::InvalidUrl(format!(
            "exceeds maximum length of {} characters",
            MAX_URL_LENGTH
        )));
    }

    let url = Url::parse(raw).map_err(|e| RequestError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(RequestError::InvalidUrl(format!(
                "unsupported scheme '{}', only http and https are allowed",
                scheme
            )))
        }
    }
    if url.host_str().is_none() {
        return Err(RequestError::InvalidUrl("missing host".to_string()));
    }
    Ok(url)
}

/// Validate an output file name.
///
/// Valid format: alphanumeric, hyphens, underscores, dots. No path traversal.
pub fn is_valid_output_filename(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_FILENAME_LENGTH {
        return false;
    }
    if name.contains("..") || name.starts_with('.') {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(body: serde_json::Value) -> Result<JobRequest, RequestError> {
        serde_json::from_value::<RenderRequest>(body).unwrap().validate()
    }

    #[test]
    fn test_inline_payload() {
        let req = parse(json!({"payload": {"text": "hello"}, "output_filename": "demo.mp4"})).unwrap();
        assert_eq!(req.source, PayloadSource::Inline(json!({"text": "hello"})));
        assert_eq!(req.output_filename.as_deref(), Some("demo.mp4"));
    }

    #[test]
    fn test_remote_payload() {
        let req = parse(json!({"payload_url": "https://example.com/p.json"})).unwrap();
        match req.source {
            PayloadSource::Remote(url) => assert_eq!(url.as_str(), "https://example.com/p.json"),
            other => panic!("unexpected source {:?}", other),
        }
        assert!(req.output_filename.is_none());
    }

    #[test]
    fn test_default_output_filename() {
        let req = parse(json!({"payload": {}})).unwrap();
        let id = JobId::from_string("abc");
        assert_eq!(req.output_filename_for(&id), "abc.mp4");
    }

    #[test]
    fn test_missing_or_ambiguous_payload() {
        assert_eq!(parse(json!({})).unwrap_err(), RequestError::MissingPayload);
        assert_eq!(
            parse(json!({"payload": null, "payload_url": ""})).unwrap_err(),
            RequestError::MissingPayload
        );
        assert_eq!(
            parse(json!({"payload": {}, "payload_url": "https://example.com/p.json"})).unwrap_err(),
            RequestError::AmbiguousPayload
        );
    }

    #[test]
    fn test_payload_must_be_object() {
        assert_eq!(
            parse(json!({"payload": [1, 2, 3]})).unwrap_err(),
            RequestError::PayloadNotObject
        );
    }

    #[test]
    fn test_rejects_non_http_urls() {
        for url in ["file:///etc/passwd", "ftp://example.com/p.json", "not a url"] {
            assert!(matches!(
                parse(json!({"payload_url": url})),
                Err(RequestError::InvalidUrl(_))
            ));
        }
    }

    #[test]
    fn test_output_filename_validation() {
        assert!(is_valid_output_filename("demo.mp4"));
        assert!(is_valid_output_filename("clip_001-final.mp4"));
        assert!(!is_valid_output_filename("../etc/passwd"));
        assert!(!is_valid_output_filename("path/to/file.mp4"));
        assert!(!is_valid_output_filename(".hidden.mp4"));
        assert!(!is_valid_output_filename(""));
        assert!(matches!(
            parse(json!({"payload": {}, "output_filename": "a/b.mp4"})),
            Err(RequestError::InvalidFilename(_))
        ));
    }
}
