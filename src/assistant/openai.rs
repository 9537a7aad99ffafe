use async_trait::async_trait;
use log::debug;
use reqwest::{ Client as HttpClient, Response, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ de::DeserializeOwned, Deserialize, Serialize };
use std::error::Error as StdError;

use super::{ AssistantClient, AssistantError, ClientConfig };
use crate::models::chat::{ Message, Role, Run, Thread };

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAIAssistantClient {
    http: HttpClient,
    base_url: String,
}

#[derive(Serialize)]
struct CreateMessageRequest<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Serialize)]
struct CreateRunRequest<'a> {
    assistant_id: &'a str,
}

#[derive(Deserialize)]
struct ObjectId {
    id: String,
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<Message>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl OpenAIAssistantClient {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        request_timeout: std::time::Duration
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("OpenAI-Beta", HeaderValue::from_static("assistants=v2"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
            format!("Invalid API key format: {}", e)
        )?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = HttpClient::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        Ok(Self {
            http,
            base_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        if config.api_key.trim().is_empty() {
            return Err("Assistant API key is required".into());
        }
        Self::new(config.api_key.clone(), config.base_url.clone(), config.request_timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(
        operation: &'static str,
        resp: Response
    ) -> Result<T, AssistantError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json
                ::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            return Err(AssistantError::Remote {
                operation,
                status: Some(status.as_u16()),
                message,
            });
        }
        let bytes = resp.bytes().await?;
        serde_json::from_slice::<T>(&bytes).map_err(|e| AssistantError::Remote {
            operation,
            status: Some(status.as_u16()),
            message: format!("unexpected response body: {}", e),
        })
    }
}

#[async_trait]
impl AssistantClient for OpenAIAssistantClient {
    async fn create_thread(&self) -> Result<Thread, AssistantError> {
        let resp = self.http
            .post(self.url("/threads"))
            .json(&serde_json::json!({}))
            .send().await?;
        let thread: Thread = Self::decode("create thread", resp).await?;
        debug!("Created thread {}", thread.id);
        Ok(thread)
    }

    async fn post_message(
        &self,
        thread_id: &str,
        role: Role,
        text: &str
    ) -> Result<String, AssistantError> {
        if text.trim().is_empty() {
            return Err(AssistantError::remote("post message", "message text is empty"));
        }
        let req = CreateMessageRequest { role, content: text };
        let resp = self.http
            .post(self.url(&format!("/threads/{}/messages", thread_id)))
            .json(&req)
            .send().await?;
        let created: ObjectId = Self::decode("post message", resp).await?;
        debug!("Posted message {} to thread {}", created.id, thread_id);
        Ok(created.id)
    }

    async fn start_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, AssistantError> {
        if assistant_id.trim().is_empty() {
            return Err(AssistantError::remote("start run", "assistant id is empty"));
        }
        let req = CreateRunRequest { assistant_id };
        let resp = self.http
            .post(self.url(&format!("/threads/{}/runs", thread_id)))
            .json(&req)
            .send().await?;
        let run: Run = Self::decode("start run", resp).await?;
        debug!("Started run {} on thread {} ({})", run.id, thread_id, run.status);
        Ok(run)
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        let resp = self.http
            .get(self.url(&format!("/threads/{}/runs/{}", thread_id, run_id)))
            .send().await?;
        Self::decode("get run", resp).await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, AssistantError> {
        let resp = self.http
            .get(self.url(&format!("/threads/{}/messages", thread_id)))
            .query(&[("order", "desc")])
            .send().await?;
        let list: MessageList = Self::decode("list messages", resp).await?;
        Ok(list.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::RunStatus;
    use std::time::Duration;
    use wiremock::matchers::{ body_json, header, method, path, query_param };
    use wiremock::{ Mock, MockServer, ResponseTemplate };

    fn test_client(base_url: &str) -> OpenAIAssistantClient {
        OpenAIAssistantClient::new(
            "test-api-key".into(),
            Some(base_url.to_string()),
            Duration::from_secs(5)
        ).unwrap()
    }

    #[tokio::test]
    async fn create_thread_sends_auth_and_beta_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/threads"))
            .and(header("authorization", "Bearer test-api-key"))
            .and(header("openai-beta", "assistants=v2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(
                    serde_json::json!({ "id": "thread_abc", "object": "thread", "created_at": 1700000000 })
                )
            )
            .expect(1)
            .mount(&server).await;

        let thread = test_client(&server.uri()).create_thread().await.unwrap();
        assert_eq!(thread.id, "thread_abc");
    }

    #[tokio::test]
    async fn post_message_sends_role_and_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/threads/thread_abc/messages"))
            .and(body_json(serde_json::json!({ "role": "user", "content": "hello" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "msg_1" })))
            .mount(&server).await;

        let id = test_client(&server.uri())
            .post_message("thread_abc", Role::User, "hello").await
            .unwrap();
        assert_eq!(id, "msg_1");
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

        let err = test_client(&server.uri())
            .post_message("thread_abc", Role::User, "   ").await
            .unwrap_err();
        assert!(err.is_remote());
    }

    #[tokio::test]
    async fn start_run_returns_initial_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/threads/thread_abc/runs"))
            .and(body_json(serde_json::json!({ "assistant_id": "asst_1" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(
                    serde_json::json!({ "id": "run_1", "thread_id": "thread_abc", "status": "queued" })
                )
            )
            .mount(&server).await;

        let run = test_client(&server.uri()).start_run("thread_abc", "asst_1").await.unwrap();
        assert_eq!(run.id, "run_1");
        assert_eq!(run.status, RunStatus::Queued);
    }

    #[tokio::test]
    async fn api_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/threads/thread_abc/runs/run_1"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(
                    serde_json::json!({ "error": { "message": "No run found with id 'run_1'.", "type": "invalid_request_error" } })
                )
            )
            .mount(&server).await;

        let err = test_client(&server.uri()).get_run("thread_abc", "run_1").await.unwrap_err();
        match err {
            AssistantError::Remote { operation, status, message } => {
                assert_eq!(operation, "get run");
                assert_eq!(status, Some(404));
                assert_eq!(message, "No run found with id 'run_1'.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_messages_requests_newest_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/threads/thread_abc/messages"))
            .and(query_param("order", "desc"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(
                    serde_json::json!({
                    "object": "list",
                    "data": [
                        { "id": "msg_2", "role": "assistant", "content": [{ "type": "text", "text": { "value": "hi", "annotations": [] } }] },
                        { "id": "msg_1", "role": "user", "content": [{ "type": "text", "text": { "value": "hello", "annotations": [] } }] }
                    ]
                })
                )
            )
            .mount(&server).await;

        let messages = test_client(&server.uri()).list_messages("thread_abc").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].first_text(), Some("hi"));
    }

    #[test]
    fn from_config_requires_api_key() {
        let config = ClientConfig::default();
        assert!(OpenAIAssistantClient::from_config(&config).is_err());
    }
}
