use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("model API returned {status}: {body}")]
    ApiError { status: u16, body: String },
}

/// A multimodal completion endpoint that sees all images in one context.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Returns the first choice's message content, if any.
    async fn complete(&self, prompt: &str, images: &[String]) -> Result<Option<String>, VisionError>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    max_tokens: u32,
}

/// OpenAI-compatible chat completion client.
#[derive(Clone)]
pub struct OpenAiVisionClient {
    http_client: HttpClient,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiVisionClient {
    pub fn new(http_client: HttpClient, api_key: String, base_url: String, model: String) -> Self {
        Self {
            http_client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }
}

/// Bare base64 payloads are sent as JPEG data URLs.
pub fn to_data_url(image: &str) -> String {
    if image.starts_with("data:") {
        image.to_string()
    } else {
        format!("data:image/jpeg;base64,{}", image)
    }
}

#[async_trait]
impl VisionModel for OpenAiVisionClient {
    async fn complete(&self, prompt: &str, images: &[String]) -> Result<Option<String>, VisionError> {
        let mut content = vec![json!({ "type": "text", "text": prompt })];
        content.extend(images.iter().map(|image| {
            json!({
                "type": "image_url",
                "image_url": { "url": to_data_url(image) }
            })
        }));
        let request = ChatRequest {
            model: &self.model,
            messages: vec![json!({ "role": "user", "content": content })],
            max_tokens: 500,
        };

        log::debug!("Requesting verdict from {} for {} images", self.model, images.len());
        let response = self
            .http_client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletion = response.json().await?;
        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn client(server: &MockServer) -> OpenAiVisionClient {
        OpenAiVisionClient::new(
            HttpClient::new(),
            "sk-test".to_string(),
            server.uri(),
            "gpt-4o".to_string(),
        )
    }

    #[test]
    fn data_urls_are_kept() {
        assert_eq!(to_data_url("data:image/png;base64,AAAA"), "data:image/png;base64,AAAA");
        assert_eq!(to_data_url("AAAA"), "data:image/jpeg;base64,AAAA");
    }

    #[tokio::test]
    async fn sends_both_images_in_one_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(|req: &Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap_or_default();
                let parts = body["messages"][0]["content"].as_array().cloned().unwrap_or_default();
                parts.len() == 3
                    && parts[0]["type"] == "text"
                    && parts[1]["image_url"]["url"] == "data:image/jpeg;base64,AAAA"
                    && parts[2]["image_url"]["url"] == "data:image/png;base64,BBBB"
            })
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cmpl-1",
                "object": "chat.completion",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"validityFactor\":1}"}, "finish_reason": "stop"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let content = client(&server)
            .complete("prompt", &["AAAA".to_string(), "data:image/png;base64,BBBB".to_string()])
            .await
            .unwrap();
        assert_eq!(content.as_deref(), Some("{\"validityFactor\":1}"));
    }

    #[tokio::test]
    async fn no_choices_is_empty_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let content = client(&server).complete("p", &[]).await.unwrap();
        assert!(content.is_none());
    }

    #[tokio::test]
    async fn api_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        match client(&server).complete("p", &[]).await {
            Err(VisionError::ApiError { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "rate limited");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
