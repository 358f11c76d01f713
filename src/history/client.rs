use anyhow::{anyhow, Context, Result};
use std::time::Duration;

use crate::config::validate_api_url;
use crate::{DetectionSnapshot, ErrorBody, NewDetection};

/// Request/response contract of the detection store.
///
/// `create` returns the stored snapshot with its server-assigned id and
/// timestamp. `list` returns every snapshot, newest first.
pub trait PersistenceClient: Send + Sync {
    fn create(&self, objects: &[String]) -> Result<DetectionSnapshot>;
    fn list(&self) -> Result<Vec<DetectionSnapshot>>;
}

/// `PersistenceClient` over HTTP/JSON (`POST`/`GET <base>/detections`).
pub struct HttpPersistenceClient {
    agent: ureq::Agent,
    endpoint: String,
}

impl HttpPersistenceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = validate_api_url(base_url)?;
        let endpoint = format!("{}/detections", base.as_str().trim_end_matches('/'));
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { agent, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl PersistenceClient for HttpPersistenceClient {
    fn create(&self, objects: &[String]) -> Result<DetectionSnapshot> {
        let body = NewDetection {
            objects: objects.to_vec(),
        };
        let response = self
            .agent
            .post(&self.endpoint)
            .send_json(&body)
            .map_err(|err| request_error("save detection", err))?;
        response
            .into_json::<DetectionSnapshot>()
            .context("decode saved detection")
    }

    fn list(&self) -> Result<Vec<DetectionSnapshot>> {
        let response = self
            .agent
            .get(&self.endpoint)
            .call()
            .map_err(|err| request_error("fetch detections", err))?;
        response
            .into_json::<Vec<DetectionSnapshot>>()
            .context("decode detection history")
    }
}

fn request_error(action: &str, err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, response) => {
            let detail = response
                .into_string()
                .ok()
                .and_then(|body| {
                    serde_json::from_str::<ErrorBody>(&body)
                        .map(|e| e.error)
                        .ok()
                        .or(Some(body))
                })
                .unwrap_or_default();
            anyhow!("{} failed: server returned {}: {}", action, code, detail)
        }
        ureq::Error::Transport(transport) => {
            anyhow!("{} failed: {}", action, transport)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_joined_onto_base_url() {
        let client =
            HttpPersistenceClient::new("http://127.0.0.1:4000/api/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:4000/api/detections");
    }

    #[test]
    fn rejects_non_http_base_url() {
        assert!(HttpPersistenceClient::new("ftp://store", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn unreachable_store_is_a_soft_error() {
        // Port 9 (discard) on loopback is closed in test environments.
        let client =
            HttpPersistenceClient::new("http://127.0.0.1:9/api", Duration::from_millis(500))
                .unwrap();
        let err = client.list().unwrap_err();
        assert!(err.to_string().contains("fetch detections failed"));
    }
}
