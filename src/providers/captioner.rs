//! Caption and tag generation via an OpenAI-compatible vision endpoint
//! (works with LM Studio, OpenAI, and compatible local servers).

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::GenericImageView;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::config::CaptionerConfig;

use super::CaptionProvider;

/// Largest image dimension sent to the model; bigger photos are downscaled
/// before encoding to keep request bodies small.
const MAX_IMAGE_DIM: u32 = 1024;

const CAPTION_PROMPT: &str =
    "Describe this photo in one detailed paragraph. Respond with only the description.";

const TAGS_PROMPT: &str = "List 5-10 short comma-separated tags describing this photo \
     (subjects, setting, activity). Respond with only the tags.";

pub struct HttpCaptioner {
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl HttpCaptioner {
    /// Connect to the configured endpoint. Fails when the endpoint is
    /// unreachable so the caller can degrade the feature up front instead
    /// of erroring on every photo.
    pub fn connect(config: &CaptionerConfig) -> Result<Self> {
        let captioner = Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        };
        captioner.probe()?;
        Ok(captioner)
    }

    fn probe(&self) -> Result<()> {
        let url = format!("{}/models", self.endpoint);
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(5))
            .build();
        agent
            .get(&url)
            .call()
            .map_err(|e| anyhow!("caption endpoint unreachable at {}: {}", self.endpoint, e))?;
        Ok(())
    }

    fn chat(&self, prompt: &str, image_path: &Path) -> Result<String> {
        let data_url = encode_image(image_path, MAX_IMAGE_DIM)?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            max_tokens: 500,
            temperature: 0.7,
        };

        let url = format!("{}/chat/completions", self.endpoint);

        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(120))
            .build();

        let mut req = agent.post(&url).set("Content-Type", "application/json");

        if let Some(ref api_key) = self.api_key {
            req = req.set("Authorization", &format!("Bearer {}", api_key));
        }

        let response = req
            .send_json(&request)
            .map_err(|e| anyhow!("caption request failed: {}", e))?;

        let chat_response: ChatResponse = response
            .into_json()
            .map_err(|e| anyhow!("failed to parse caption response: {}", e))?;

        chat_response
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| anyhow!("no response from caption model"))
    }
}

impl CaptionProvider for HttpCaptioner {
    fn caption(&self, image_path: &Path) -> Result<String> {
        self.chat(CAPTION_PROMPT, image_path)
    }

    fn tags(&self, image_path: &Path) -> Result<Vec<String>> {
        let response = self.chat(TAGS_PROMPT, image_path)?;
        Ok(parse_tags(&response))
    }
}

/// Load an image, downscale it if needed, and encode it as a JPEG data URL.
fn encode_image(path: &Path, max_dim: u32) -> Result<String> {
    let img = image::open(path).map_err(|e| anyhow!("failed to load image: {}", e))?;

    let (width, height) = img.dimensions();
    let img = if width.max(height) > max_dim {
        img.resize(max_dim, max_dim, image::imageops::FilterType::Triangle)
    } else {
        img
    };

    let mut buf = Vec::new();
    img.to_rgb8()
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Jpeg)?;

    Ok(format!("data:image/jpeg;base64,{}", BASE64.encode(&buf)))
}

/// Split a model response into clean lowercase tags. Models sometimes
/// return one tag per line instead of commas, so both are handled.
fn parse_tags(response: &str) -> Vec<String> {
    response
        .split(|c| c == ',' || c == '\n')
        .map(|t| t.trim().trim_matches('.').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}
