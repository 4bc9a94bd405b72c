use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hair color used when the analyzer gives nothing usable.
pub const DEFAULT_COLOR_HEX: &str = "#222222";

/// Structured description of a reference hairstyle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StyleAttributes {
    pub length: String,
    pub curl: String,
    pub bangs: String,
    pub parting: String,
    pub color_family: String,
    pub color_hex: String,
    pub layers: String,
    pub volume: String,
}

impl Default for StyleAttributes {
    fn default() -> Self {
        Self {
            length: "medium-long".to_string(),
            curl: "slight wave".to_string(),
            bangs: "no bangs".to_string(),
            parting: "center part".to_string(),
            color_family: "natural black".to_string(),
            color_hex: DEFAULT_COLOR_HEX.to_string(),
            layers: "light layers".to_string(),
            volume: "medium".to_string(),
        }
    }
}

/// Analyzer output: attributes plus the short description fed to the generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StyleDescription {
    pub attributes: StyleAttributes,
    pub style_desc: String,
}

impl StyleAttributes {
    /// Build attributes from the model's raw text reply.
    ///
    /// The reply is supposed to be a bare JSON object, but models sometimes
    /// wrap it in a Markdown code fence or use alternative key names for the
    /// color fields. Anything missing or blank falls back to the defaults.
    pub fn from_model_text(text: &str) -> Self {
        let raw = parse_lenient(text);
        let defaults = Self::default();

        let field = |keys: &[&str], fallback: String| -> String {
            keys.iter()
                .filter_map(|k| raw.get(*k).and_then(Value::as_str))
                .map(str::trim)
                .find(|v| !v.is_empty())
                .map(str::to_string)
                .unwrap_or(fallback)
        };

        Self {
            length: field(&["length"], defaults.length),
            curl: field(&["curl"], defaults.curl),
            bangs: field(&["bangs"], defaults.bangs),
            parting: field(&["parting"], defaults.parting),
            color_family: field(&["color_family", "color", "hair_color"], defaults.color_family),
            color_hex: field(&["color_hex", "hex", "hair_hex"], defaults.color_hex),
            layers: field(&["layers"], defaults.layers),
            volume: field(&["volume"], defaults.volume),
        }
    }

    /// Compact comma-separated description, omitting neutral values.
    pub fn summary(&self) -> String {
        let length = if self.curl == "straight" {
            self.length.clone()
        } else {
            format!("{} {}", self.length, self.curl)
        };

        let mut parts = vec![length, self.parting.clone(), self.bangs.clone(), self.color_family.clone()];
        if self.layers != "no layers" {
            parts.push(self.layers.clone());
        }
        if self.volume != "medium" {
            parts.push(format!("{} volume", self.volume));
        }
        parts.join(", ")
    }
}

fn parse_lenient(text: &str) -> serde_json::Map<String, Value> {
    let as_object = |s: &str| match serde_json::from_str::<Value>(s) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    };

    as_object(text)
        .or_else(|| as_object(&text.replace("```json", "").replace("```", "")))
        .unwrap_or_default()
}
