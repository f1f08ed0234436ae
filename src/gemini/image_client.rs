use crate::{
    config::GeminiConfig,
    error::{ImageGenError, Result},
    gemini::traits::ImageBackend,
    models::{GenerateContentRequest, GenerateContentResponse, Part},
};
use async_trait::async_trait;
use reqwest::Client;

const MAX_ERROR_BODY: usize = 200;

#[derive(Clone)]
pub struct ImageClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ImageClient {
    /// No request timeout is set; the transport decides.
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        let client = Client::builder()
            .build()
            .map_err(|e| ImageGenError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn endpoint(&self, model_id: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model_id)
    }

    fn build_headers(&self) -> Result<reqwest::header::HeaderMap> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            self.api_key
                .parse()
                .map_err(|_| ImageGenError::ConfigError("Invalid API key header".into()))?,
        );
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        Ok(headers)
    }
}

#[async_trait]
impl ImageBackend for ImageClient {
    async fn generate_content(
        &self,
        model_id: &str,
        parts: Vec<Part>,
    ) -> Result<GenerateContentResponse> {
        let payload = GenerateContentRequest::new(parts);

        log::info!("Generating image with model: {}", model_id);
        log::debug!(
            "generateContent request with {} part(s)",
            payload.contents.first().map_or(0, |c| c.parts.len())
        );

        let response = self
            .client
            .post(self.endpoint(model_id))
            .headers(self.build_headers()?)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ImageGenError::TransportError(format!("Gemini request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let truncated: String = error_text.chars().take(MAX_ERROR_BODY).collect();
            log::error!("Gemini API returned {}: {}", status, truncated);
            return Err(ImageGenError::TransportError(format!(
                "Gemini API error {}: {}",
                status, truncated
            )));
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| ImageGenError::ResponseError(format!("Failed to parse Gemini response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client_for(url: &str) -> ImageClient {
        ImageClient::new(&GeminiConfig::new().with_api_key("test-key").with_base_url(url)).unwrap()
    }

    #[test]
    fn test_endpoint_format() {
        let client = client_for("https://example.test/v1beta/");
        assert_eq!(
            client.endpoint("gemini-2.5-flash-image-preview"),
            "https://example.test/v1beta/models/gemini-2.5-flash-image-preview:generateContent"
        );
    }

    #[tokio::test]
    async fn test_posts_parts_and_parses_candidates() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash-image-preview:generateContent")
            .match_header("x-goog-api-key", "test-key")
            .match_body(mockito::Matcher::PartialJson(json!({
                "contents": [{"parts": [{"text": "a lighthouse"}]}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "candidates": [{"content": {"parts": [
                        {"inlineData": {"mimeType": "image/png", "data": "AQID"}}
                    ]}}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = client_for(&server.url());
        let response = client
            .generate_content("gemini-2.5-flash-image-preview", vec![Part::text("a lighthouse")])
            .await
            .unwrap();

        mock.assert_async().await;
        let inline = response.candidates[0].parts()[0].inline_data.as_ref().unwrap();
        assert_eq!(inline.data.decode().unwrap().as_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_http_error_is_transport_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", mockito::Matcher::Any)
            .with_status(403)
            .with_body("API key not valid")
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client
            .generate_content("gemini-2.5-flash-image-preview", vec![Part::text("x")])
            .await
            .unwrap_err();
        match err {
            ImageGenError::TransportError(msg) => {
                assert!(msg.contains("403"));
                assert!(msg.contains("API key not valid"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_garbage_body_is_response_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", mockito::Matcher::Any)
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client
            .generate_content("gemini-2.5-flash-image-preview", vec![Part::text("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, ImageGenError::ResponseError(_)));
    }
}
