use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::HuddleError;
use crate::settings::Settings;
use crate::tokens::{Role, TokenIssuer};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    session_id: &'a str,
    role: Role,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Either `{token}` / `{sessionId}` or `{error: {message}}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    token: Option<String>,
    session_id: Option<serde_json::Value>,
    error: Option<ApiErrorBody>,
}

/// Creates new sessions on the application backend.
#[async_trait]
pub trait SessionProvisioner: Send + Sync {
    async fn create_session(&self) -> Result<String, HuddleError>;
}

/// Client for the application backend that provisions sessions and mints tokens.
pub struct ApiClient {
    http: reqwest::Client,
    token_url: Url,
    session_url: Url,
}

impl ApiClient {
    pub fn new(settings: &Settings) -> Result<Self, HuddleError> {
        let base = Url::parse(&settings.api_base_url)
            .map_err(|e| HuddleError::Config(format!("api_base_url: {e}")))?;
        let token_url = base
            .join(&settings.token_path)
            .map_err(|e| HuddleError::Config(format!("token_path: {e}")))?;
        let session_url = base
            .join(&settings.session_path)
            .map_err(|e| HuddleError::Config(format!("session_path: {e}")))?;

        Ok(Self {
            http: reqwest::Client::new(),
            token_url,
            session_url,
        })
    }

    async fn read_response(resp: reqwest::Response) -> Result<ApiResponse, String> {
        let status = resp.status();
        let body: Option<ApiResponse> = resp.json().await.ok();

        match body {
            Some(ApiResponse {
                error: Some(error), ..
            }) => Err(error.message),
            Some(body) if status.is_success() => Ok(body),
            _ => Err(format!("backend returned status {status}")),
        }
    }
}

#[async_trait]
impl TokenIssuer for ApiClient {
    async fn issue_token(&self, session_id: &str, role: Role) -> Result<String, HuddleError> {
        tracing::debug!("POST {} for session {session_id}", self.token_url);

        let resp = self
            .http
            .post(self.token_url.clone())
            .json(&TokenRequest { session_id, role })
            .send()
            .await
            .map_err(|e| HuddleError::TokenIssuance(e.to_string()))?;

        let body = Self::read_response(resp)
            .await
            .map_err(HuddleError::TokenIssuance)?;

        body.token
            .ok_or_else(|| HuddleError::TokenIssuance("response is missing the token field".into()))
    }
}

#[async_trait]
impl SessionProvisioner for ApiClient {
    async fn create_session(&self) -> Result<String, HuddleError> {
        tracing::debug!("GET {}", self.session_url);

        let resp = self
            .http
            .get(self.session_url.clone())
            .send()
            .await
            .map_err(|e| HuddleError::Http(e.to_string()))?;

        let body = Self::read_response(resp)
            .await
            .map_err(HuddleError::Provisioning)?;

        match body.session_id {
            Some(serde_json::Value::String(id)) if !id.is_empty() => {
                tracing::info!("provisioned session {id}");
                Ok(id)
            }
            other => Err(HuddleError::Provisioning(format!(
                "invalid sessionId {}",
                other.unwrap_or(serde_json::Value::Null)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ApiClient {
        let settings = Settings {
            api_base_url: server.uri(),
            ..Settings::default()
        };
        ApiClient::new(&settings).unwrap()
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let settings = Settings {
            api_base_url: "not a url".into(),
            ..Settings::default()
        };
        assert!(matches!(ApiClient::new(&settings), Err(HuddleError::Config(_))));
    }

    #[tokio::test]
    async fn issue_token_posts_session_and_role() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate-token"))
            .and(body_json(serde_json::json!({
                "sessionId": "s1",
                "role": "subscriber",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": "T1" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let token = client(&server)
            .issue_token("s1", Role::Subscriber)
            .await
            .unwrap();
        assert_eq!(token, "T1");
    }

    #[tokio::test]
    async fn issue_token_surfaces_backend_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate-token"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "message": "moderator is not a valid role." }
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .issue_token("s1", Role::Publisher)
            .await
            .unwrap_err();
        match err {
            HuddleError::TokenIssuance(message) => {
                assert_eq!(message, "moderator is not a valid role.")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn issue_token_without_token_field_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = client(&server)
            .issue_token("s1", Role::Publisher)
            .await
            .unwrap_err();
        assert!(matches!(err, HuddleError::TokenIssuance(_)));
    }

    #[tokio::test]
    async fn issue_token_with_non_json_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client(&server)
            .issue_token("s1", Role::Publisher)
            .await
            .unwrap_err();
        match err {
            HuddleError::TokenIssuance(message) => assert!(message.contains("502")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_session_returns_session_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/create-session"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "sessionId": "1_MX4xMjM0" })),
            )
            .mount(&server)
            .await;

        let id = client(&server).create_session().await.unwrap();
        assert_eq!(id, "1_MX4xMjM0");
    }

    #[tokio::test]
    async fn create_session_rejects_non_string_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/create-session"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "sessionId": 42 })),
            )
            .mount(&server)
            .await;

        let err = client(&server).create_session().await.unwrap_err();
        assert!(matches!(err, HuddleError::Provisioning(ref m) if m.contains("42")));
    }

    #[tokio::test]
    async fn create_session_surfaces_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/create-session"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "message": "Failed to create session" }
            })))
            .mount(&server)
            .await;

        let err = client(&server).create_session().await.unwrap_err();
        assert!(matches!(err, HuddleError::Provisioning(ref m) if m == "Failed to create session"));
    }
}
