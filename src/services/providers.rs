use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::creative::CreativeCopy;

/// Input for ad copy generation.
#[derive(Debug, Clone, Serialize)]
pub struct CopyRequest {
    pub brand_name: String,
    pub brand_description: Option<String>,
    pub site_summary: String,
    pub brief: Option<String>,
    pub count: usize,
}

/// Input for one image generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: String,
    /// Index of the variation this call produces.
    pub variation: usize,
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl GeneratedImage {
    /// Sniff the image format and wrap the bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ProviderError> {
        let format = image::guess_format(&bytes)
            .map_err(|e| ProviderError::InvalidResponse(format!("not an image: {e}")))?;
        Ok(Self {
            bytes,
            content_type: format.to_mime_type().to_string(),
        })
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_copy(&self, request: &CopyRequest) -> Result<Vec<CreativeCopy>, ProviderError>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, ProviderError>;
}

const COPY_SYSTEM_PROMPT: &str = concat!(
    "You write Meta Ads copy. Reply with JSON only: ",
    "{\"variants\": [{\"headline\": string (max 40 chars), ",
    "\"primaryText\": string (max 125 chars), \"description\": string (max 30 chars), ",
    "\"callToAction\": one of LEARN_MORE, SHOP_NOW, SIGN_UP, BOOK_NOW, CONTACT_US, DOWNLOAD, GET_OFFER, SUBSCRIBE}]}"
);

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct OpenAiTextClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct CopyEnvelope {
    variants: Vec<CreativeCopy>,
}

impl OpenAiTextClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

/// Render the user prompt for a copy request.
pub fn copy_prompt(request: &CopyRequest) -> String {
    let mut prompt = format!(
        "Write {} distinct ad copy variants for the brand \"{}\".\n",
        request.count, request.brand_name
    );
    if let Some(description) = &request.brand_description {
        prompt.push_str(&format!("Brand description: {description}\n"));
    }
    if !request.site_summary.is_empty() {
        prompt.push_str(&format!("Website summary: {}\n", request.site_summary));
    }
    if let Some(brief) = &request.brief {
        prompt.push_str(&format!("Campaign brief: {brief}\n"));
    }
    prompt
}

#[async_trait]
impl TextGenerator for OpenAiTextClient {
    async fn generate_copy(&self, request: &CopyRequest) -> Result<Vec<CreativeCopy>, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = serde_json::json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": COPY_SYSTEM_PROMPT },
                { "role": "user", "content": copy_prompt(request) }
            ]
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("no choices returned".to_string()))?;

        let envelope: CopyEnvelope = serde_json::from_str(&content)?;
        Ok(envelope.variants)
    }
}

/// Client for an OpenAI-compatible image generation endpoint.
pub struct OpenAiImageClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ImagesResponse {
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
    url: Option<String>,
}

impl OpenAiImageClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageClient {
    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, ProviderError> {
        let url = format!("{}/images/generations", self.base_url);

        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": request.prompt,
            "size": request.size,
            "n": 1
        });
        // DALL-E models return URLs unless asked otherwise.
        if self.model.starts_with("dall-e") {
            body["response_format"] = serde_json::json!("b64_json");
        }

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let images: ImagesResponse = response.json().await?;
        let datum = images
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("no image returned".to_string()))?;

        let bytes = match (datum.b64_json, datum.url) {
            (Some(b64), _) => base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| ProviderError::InvalidResponse(format!("bad base64: {e}")))?,
            (None, Some(url)) => self
                .http
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?
                .to_vec(),
            (None, None) => {
                return Err(ProviderError::InvalidResponse(
                    "image has neither data nor url".to_string(),
                ))
            }
        };

        GeneratedImage::from_bytes(bytes)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse provider response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_prompt_includes_context() {
        let prompt = copy_prompt(&CopyRequest {
            brand_name: "Acme".to_string(),
            brand_description: Some("Rockets for coyotes".to_string()),
            site_summary: "Acme | Fast delivery".to_string(),
            brief: Some("Spring sale".to_string()),
            count: 3,
        });
        assert!(prompt.contains("3 distinct"));
        assert!(prompt.contains("Rockets for coyotes"));
        assert!(prompt.contains("Spring sale"));
    }

    #[test]
    fn test_copy_envelope_parses_camel_case() {
        let envelope: CopyEnvelope = serde_json::from_str(
            r#"{"variants":[{"headline":"Go fast","primaryText":"Try it","description":"Now","callToAction":"SHOP_NOW"}]}"#,
        )
        .unwrap();
        assert_eq!(envelope.variants[0].call_to_action, "SHOP_NOW");
    }

    #[test]
    fn test_generated_image_rejects_non_image() {
        assert!(GeneratedImage::from_bytes(b"definitely not a png".to_vec()).is_err());
    }

    #[test]
    fn test_generated_image_sniffs_png() {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([1, 2, 3, 255]));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        let generated = GeneratedImage::from_bytes(buf.into_inner()).unwrap();
        assert_eq!(generated.content_type, "image/png");
    }
}
