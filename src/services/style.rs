use async_trait::async_trait;
use serde_json::json;

use crate::models::style::{StyleAttributes, StyleDescription};
use crate::services::generation::{GeminiClient, GenerationError};

const ANALYSIS_PROMPT: &str = concat!(
    "Analyze this hairstyle reference image and return JSON with exactly these fields: ",
    "length (short/chin/medium/medium-long/long/very long), ",
    "curl (straight/slight wave/S-wave/big curls/tight curls), ",
    "bangs (no bangs/blunt bangs/airy bangs/side bangs/curtain bangs), ",
    "parting (center part/side part/left/right), ",
    "color_family (natural black/cool brown/warm brown/milk-tea brown/ash brown/golden brown/red brown), ",
    "color_hex (#RRGGBB), ",
    "layers (no layers/light layers/heavy layers/wolf cut), ",
    "volume (thin/medium/thick). ",
    "Look only at the hair; ignore background, skin and clothes. ",
    "If the hair has brown, golden or red tones, do not answer natural black. ",
    "Return ONLY JSON."
);

/// Turns a reference style photo into attributes and a target color.
#[async_trait]
pub trait StyleAnalyzer: Send + Sync {
    async fn analyze(&self, style_image: &[u8]) -> Result<StyleDescription, GenerationError>;
}

#[async_trait]
impl StyleAnalyzer for GeminiClient {
    async fn analyze(&self, style_image: &[u8]) -> Result<StyleDescription, GenerationError> {
        let parts = vec![json!({ "text": ANALYSIS_PROMPT }), GeminiClient::inline_image(style_image)];
        let config = json!({ "responseMimeType": "application/json", "temperature": 0.2 });

        let response = self.generate_content(self.text_model(), parts, config).await?;
        let text = response.first_text();
        tracing::debug!(raw = %text, "Style analysis reply");

        let attributes = StyleAttributes::from_model_text(text);
        let style_desc = attributes.summary();
        Ok(StyleDescription {
            attributes,
            style_desc,
        })
    }
}
