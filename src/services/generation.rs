use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Inputs of a single generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub subject: Vec<u8>,
    pub style: Vec<u8>,
    /// Solid PNG of the target hair color, sent as a third image.
    pub swatch: Option<Vec<u8>>,
    pub prompt: String,
}

/// External image editor. One call yields zero or one image.
///
/// `Ok(None)` is a normal outcome (policy refusal or abstention), not an
/// error.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Option<Vec<u8>>, GenerationError>;

    /// Model identifier recorded on the job.
    fn model(&self) -> &str;
}

/// Prompt asking the editor to swap the hairstyle while keeping identity.
///
/// With `swatch_hex` the prompt describes a third image, a color swatch,
/// and the reference only supplies the cut.
pub fn build_prompt(max_size: u32, style_desc: Option<&str>, swatch_hex: Option<&str>) -> String {
    let mut prompt = String::from(
        "You will see the following images:\n\
         (1) A customer portrait: the face, skin tone and identity must not change.\n",
    );
    match swatch_hex {
        Some(hex) => prompt.push_str(&format!(
            "(2) A hairstyle reference: follow its length, layering, silhouette and parting.\n\
             (3) A hair color swatch ({}): the hair color must match it in hue and lightness. \
             Do not keep or fall back to the original hair color.\n",
            hex
        )),
        None => prompt.push_str(
            "(2) A hairstyle reference: follow its length, layering, silhouette, parting and hair color strictly.\n",
        ),
    }
    if let Some(desc) = style_desc.filter(|d| !d.trim().is_empty()) {
        prompt.push_str(&format!("Additional hairstyle notes: {}\n", desc.trim()));
    }
    let color_clause = if swatch_hex.is_some() {
        " and color it like (3)"
    } else {
        ""
    };
    prompt.push_str(&format!(
        "\nReplace the whole hairstyle of (1) with the style of (2){}. Blend the hairline and the area \
         around the ears naturally; do not edit only the bangs or a local patch. Keep the lighting \
         direction and facial structure of the original photo. Output only the edited portrait, \
         with a long edge of about {}px.",
        color_clause, max_size
    ));
    prompt
}

fn mime_of(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/jpeg")
}

fn inline_part(bytes: &[u8]) -> serde_json::Value {
    json!({
        "inline_data": {
            "mime_type": mime_of(bytes),
            "data": base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    })
}

/// Prompt first, then subject, style and the optional swatch.
fn request_parts(request: &GenerationRequest) -> Vec<serde_json::Value> {
    let mut parts = vec![
        json!({ "text": request.prompt }),
        inline_part(&request.subject),
        inline_part(&request.style),
    ];
    if let Some(swatch) = &request.swatch {
        parts.push(inline_part(swatch));
    }
    parts
}

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    image_model: String,
    text_model: String,
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: serde_json::Value,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
    #[serde(default, rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    #[serde(default)]
    content: Option<ResponseContent>,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "inlineData")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(default, rename = "blockReason")]
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn first_parts(&self) -> &[ResponsePart] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[])
    }

    /// Bytes of the first inline image, if the model returned one.
    pub(crate) fn first_image(&self) -> Result<Option<Vec<u8>>, GenerationError> {
        match self.first_parts().iter().find_map(|p| p.inline_data.as_ref()) {
            Some(inline) => base64::engine::general_purpose::STANDARD
                .decode(&inline.data)
                .map(Some)
                .map_err(GenerationError::Decode),
            None => Ok(None),
        }
    }

    /// Text of the first text part, or an empty string.
    pub(crate) fn first_text(&self) -> &str {
        self.first_parts()
            .iter()
            .find_map(|p| p.text.as_deref())
            .unwrap_or("")
    }

    fn refusal_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
            .or_else(|| self.candidates.first().and_then(|c| c.finish_reason.as_deref()))
    }
}

impl GeminiClient {
    pub fn new(api_key: &str, image_model: &str, text_model: &str) -> Result<Self, GenerationError> {
        let http = Client::builder().build().map_err(GenerationError::Http)?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            image_model: image_model.to_string(),
            text_model: text_model.to_string(),
        })
    }

    pub fn text_model(&self) -> &str {
        &self.text_model
    }

    pub(crate) async fn generate_content(
        &self,
        model: &str,
        parts: Vec<serde_json::Value>,
        generation_config: serde_json::Value,
    ) -> Result<GenerateContentResponse, GenerationError> {
        let url = format!("{}/{}:generateContent", GEMINI_BASE_URL, model);
        let body = GenerateContentRequest {
            contents: vec![Content { parts }],
            generation_config,
        };

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(GenerationError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response.json().await.map_err(GenerationError::Http)
    }

    pub(crate) fn inline_image(bytes: &[u8]) -> serde_json::Value {
        inline_part(bytes)
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<Option<Vec<u8>>, GenerationError> {
        let parts = request_parts(request);
        let config = json!({ "temperature": 0.2, "topP": 0.4 });

        let response = self.generate_content(&self.image_model, parts, config).await?;
        let image = response.first_image()?;
        if image.is_none() {
            tracing::info!(
                model = %self.image_model,
                reason = response.refusal_reason().unwrap_or("none"),
                "Generator returned no image"
            );
        }
        Ok(image)
    }

    fn model(&self) -> &str {
        &self.image_model
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gemini returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode inline image data: {0}")]
    Decode(#[from] base64::DecodeError),
}
