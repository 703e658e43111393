//! HTTP implementation of the REST backend seam.
//!
//! Routes, relative to the configured base URL:
//!
//! - `POST api/queue/{resource_id}/join`
//! - `GET  api/queue/{resource_id}/position` (404 means "not queued")
//! - `POST api/queue/{resource_id}/leave`
//! - `GET  api/queue/{resource_id}/status`

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use url::Url;
use waitroom_core::backend::{
    BackendError, JoinResponse, LeaveResponse, PositionResponse, QueueBackend,
    QueueStatusResponse,
};
use waitroom_core::channel::Credential;
use waitroom_core::types::ResourceId;

/// Error body shape the backend uses for rejections.
#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// [`QueueBackend`] over HTTP via reqwest.
pub struct HttpQueueBackend {
    http: reqwest::Client,
    base_url: Url,
    credential: Option<Credential>,
}

impl HttpQueueBackend {
    /// Build a backend for `base_url`, attaching `credential` as a bearer
    /// token when present.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Request`] when the base URL is invalid or
    /// the HTTP client cannot be constructed.
    pub fn new(base_url: &str, credential: Option<Credential>) -> Result<Self, BackendError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BackendError::Request(format!("invalid base URL {base_url}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            credential,
        })
    }

    fn endpoint(&self, resource_id: ResourceId, operation: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(&format!("api/queue/{resource_id}/{operation}"))
            .map_err(|e| BackendError::Request(e.to_string()))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credential {
            Some(credential) => request.bearer_auth(credential.expose()),
            None => request,
        }
    }

    /// Map a rejection status plus body message to the typed error.
    fn classify(status: u16, message: String) -> BackendError {
        match status {
            401 => BackendError::Unauthorized,
            403 => BackendError::QueueDisabled,
            404 => BackendError::ResourceNotFound,
            409 => BackendError::AlreadyQueued(message),
            _ => BackendError::Http { status, message },
        }
    }

    async fn reject(response: reqwest::Response) -> BackendError {
        let status = response.status();
        let message = match response.json::<ApiErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };
        Self::classify(status.as_u16(), message)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl QueueBackend for HttpQueueBackend {
    #[tracing::instrument(skip(self), name = "backend_join")]
    async fn join(&self, resource_id: ResourceId) -> Result<JoinResponse, BackendError> {
        let url = self.endpoint(resource_id, "join")?;
        let response = self
            .authorize(self.http.post(url))
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        if response.status().is_success() {
            Self::decode(response).await
        } else {
            Err(Self::reject(response).await)
        }
    }

    #[tracing::instrument(skip(self), name = "backend_position")]
    async fn position(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<PositionResponse>, BackendError> {
        let url = self.endpoint(resource_id, "position")?;
        let response = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if response.status().is_success() {
            Ok(Some(Self::decode(response).await?))
        } else {
            Err(Self::reject(response).await)
        }
    }

    #[tracing::instrument(skip(self), name = "backend_leave")]
    async fn leave(&self, resource_id: ResourceId) -> Result<LeaveResponse, BackendError> {
        let url = self.endpoint(resource_id, "leave")?;
        let response = self
            .authorize(self.http.post(url))
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        if response.status().is_success() {
            Self::decode(response).await
        } else {
            Err(Self::reject(response).await)
        }
    }

    #[tracing::instrument(skip(self), name = "backend_status")]
    async fn status(&self, resource_id: ResourceId) -> Result<QueueStatusResponse, BackendError> {
        let url = self.endpoint(resource_id, "status")?;
        let response = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        if response.status().is_success() {
            Self::decode(response).await
        } else {
            Err(Self::reject(response).await)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_built_from_base_url() {
        let backend = HttpQueueBackend::new("https://queue.example.com/", None).unwrap();
        let resource = ResourceId::new();
        let url = backend.endpoint(resource, "join").unwrap();
        assert_eq!(
            url.as_str(),
            format!("https://queue.example.com/api/queue/{resource}/join")
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = HttpQueueBackend::new("not a url", None);
        assert!(matches!(result, Err(BackendError::Request(_))));
    }

    #[test]
    fn rejection_statuses_map_to_typed_errors() {
        assert_eq!(
            HttpQueueBackend::classify(401, "nope".into()),
            BackendError::Unauthorized
        );
        assert_eq!(
            HttpQueueBackend::classify(403, "disabled".into()),
            BackendError::QueueDisabled
        );
        assert_eq!(
            HttpQueueBackend::classify(404, "missing".into()),
            BackendError::ResourceNotFound
        );
        assert_eq!(
            HttpQueueBackend::classify(409, "elsewhere".into()),
            BackendError::AlreadyQueued("elsewhere".into())
        );
        assert_eq!(
            HttpQueueBackend::classify(503, "overloaded".into()),
            BackendError::Http {
                status: 503,
                message: "overloaded".into()
            }
        );
    }
}
