use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::assets::{InlineImage, WorkingSet};

/// Discrete form inputs. Every field is raw user text; "" means unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormFields {
    #[serde(alias = "systemPromptText")]
    pub system_prompt: String,
    #[serde(alias = "promptText")]
    pub prompt: String,
    pub aspect_ratio: String,
    pub image_size: String,
    pub temperature: String,
    pub top_p: String,
}

/// Canonical outgoing body. Both editing views are projections of this value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestBody {
    pub system_instruction: Option<String>,
    pub prompt: String,
    pub images: Vec<InlineImage>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub aspect_ratio: Option<String>,
    pub image_size: Option<String>,
}

/// What could be read back out of a JSON body. `None` means "not present".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonProjection {
    pub system_prompt: Option<String>,
    pub prompt: Option<String>,
    pub images: Vec<InlineImage>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub aspect_ratio: Option<String>,
    pub image_size: Option<String>,
}

/// Which form fields a JSON back-fill touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedFields {
    pub system_prompt: bool,
    pub prompt: bool,
    pub temperature: bool,
    pub top_p: bool,
    pub aspect_ratio: bool,
    pub image_size: bool,
    pub images: usize,
}

impl AppliedFields {
    pub fn names(&self) -> Vec<&'static str> {
        [
            (self.system_prompt, "systemPrompt"),
            (self.prompt, "prompt"),
            (self.temperature, "temperature"),
            (self.top_p, "topP"),
            (self.aspect_ratio, "aspectRatio"),
            (self.image_size, "imageSize"),
        ]
        .into_iter()
        .filter_map(|(applied, name)| applied.then_some(name))
        .collect()
    }
}

pub fn parse_finite(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl RequestBody {
    pub fn from_form(fields: &FormFields, images: &WorkingSet) -> Self {
        Self {
            system_instruction: non_empty(&fields.system_prompt),
            prompt: fields.prompt.clone(),
            images: images.inline_images(),
            temperature: parse_finite(&fields.temperature),
            top_p: parse_finite(&fields.top_p),
            aspect_ratio: non_empty(&fields.aspect_ratio),
            image_size: non_empty(&fields.image_size),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut parts = vec![json!({ "text": self.prompt })];
        for image in &self.images {
            parts.push(json!({
                "inline_data": {
                    "mime_type": image.mime_type,
                    "data": image.data,
                }
            }));
        }

        let mut generation_config = Map::new();
        generation_config.insert("responseModalities".to_string(), json!(["Image"]));
        if let Some(value) = self.temperature.and_then(serde_json::Number::from_f64) {
            generation_config.insert("temperature".to_string(), Value::Number(value));
        }
        if let Some(value) = self.top_p.and_then(serde_json::Number::from_f64) {
            generation_config.insert("topP".to_string(), Value::Number(value));
        }
        if self.aspect_ratio.is_some() || self.image_size.is_some() {
            let mut image_config = Map::new();
            if let Some(ratio) = &self.aspect_ratio {
                image_config.insert("aspectRatio".to_string(), Value::String(ratio.clone()));
            }
            if let Some(size) = &self.image_size {
                image_config.insert("imageSize".to_string(), Value::String(size.clone()));
            }
            generation_config.insert("imageConfig".to_string(), Value::Object(image_config));
        }

        let mut body = Map::new();
        body.insert(
            "contents".to_string(),
            json!([{ "role": "user", "parts": parts }]),
        );
        body.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );
        if let Some(system) = &self.system_instruction {
            body.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": system }] }),
            );
        }
        Value::Object(body)
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.to_json()).unwrap_or_else(|_| "{}".to_string())
    }
}

fn inline_container(part: &Value) -> Option<&Map<String, Value>> {
    part.get("inline_data")
        .or_else(|| part.get("inlineData"))
        .and_then(Value::as_object)
}

fn inline_mime(inline: &Map<String, Value>) -> Option<&str> {
    inline
        .get("mime_type")
        .or_else(|| inline.get("mimeType"))
        .and_then(Value::as_str)
}

/// Best-effort read of a request body. Missing or oddly shaped pieces are skipped.
pub fn project_json(value: &Value) -> JsonProjection {
    let mut out = JsonProjection {
        system_prompt: value
            .pointer("/systemInstruction/parts/0/text")
            .and_then(Value::as_str)
            .map(str::to_string),
        ..JsonProjection::default()
    };

    let parts = value
        .pointer("/contents/0/parts")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for part in parts {
        if out.prompt.is_none() {
            out.prompt = part.get("text").and_then(Value::as_str).map(str::to_string);
        }
        let Some(inline) = inline_container(part) else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        out.images.push(InlineImage {
            mime_type: inline_mime(inline)
                .unwrap_or(crate::codec::OCTET_STREAM)
                .to_string(),
            data: data.to_string(),
        });
    }

    if let Some(config) = value.get("generationConfig").and_then(Value::as_object) {
        out.temperature = config.get("temperature").and_then(Value::as_f64);
        out.top_p = config.get("topP").and_then(Value::as_f64);
        if let Some(image_config) = config.get("imageConfig").and_then(Value::as_object) {
            out.aspect_ratio = image_config
                .get("aspectRatio")
                .and_then(Value::as_str)
                .map(str::to_string);
            out.image_size = image_config
                .get("imageSize")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
    }
    out
}

impl FormFields {
    /// Overwrites only the fields the projection carries. Images are handled by the caller.
    pub fn apply_projection(&mut self, projection: &JsonProjection) -> AppliedFields {
        let mut applied = AppliedFields {
            images: projection.images.len(),
            ..AppliedFields::default()
        };
        if let Some(system) = &projection.system_prompt {
            self.system_prompt = system.clone();
            applied.system_prompt = true;
        }
        if let Some(prompt) = &projection.prompt {
            self.prompt = prompt.clone();
            applied.prompt = true;
        }
        if let Some(value) = projection.temperature {
            self.temperature = value.to_string();
            applied.temperature = true;
        }
        if let Some(value) = projection.top_p {
            self.top_p = value.to_string();
            applied.top_p = true;
        }
        if let Some(ratio) = &projection.aspect_ratio {
            self.aspect_ratio = ratio.clone();
            applied.aspect_ratio = true;
        }
        if let Some(size) = &projection.image_size {
            self.image_size = size.clone();
            applied.image_size = true;
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::request::assets::ImageAsset;

    fn fields(prompt: &str) -> FormFields {
        FormFields {
            prompt: prompt.to_string(),
            ..FormFields::default()
        }
    }

    #[test]
    fn empty_prompt_still_sends_text_part() {
        let body = RequestBody::from_form(&fields(""), &WorkingSet::default()).to_json();
        assert_eq!(body["contents"][0]["parts"], json!([{ "text": "" }]));
        assert_eq!(body["contents"][0]["role"], json!("user"));
        assert_eq!(body["generationConfig"], json!({ "responseModalities": ["Image"] }));
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn images_follow_text_in_insertion_order() -> anyhow::Result<()> {
        let mut images = WorkingSet::default();
        images.push(ImageAsset::from_bytes("one", "image/png", b"1"))?;
        images.push(ImageAsset::from_bytes("two", "image/jpeg", b"22"))?;
        let body = RequestBody::from_form(&fields("draw"), &images).to_json();
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], json!({ "text": "draw" }));
        assert_eq!(parts[1]["inline_data"]["mime_type"], json!("image/png"));
        assert_eq!(parts[2]["inline_data"]["mime_type"], json!("image/jpeg"));
        assert_eq!(parts[2]["inline_data"]["data"], json!("MjI="));
        Ok(())
    }

    #[test]
    fn non_finite_numbers_are_omitted() {
        let form = FormFields {
            temperature: "warm".to_string(),
            top_p: "NaN".to_string(),
            ..FormFields::default()
        };
        let body = RequestBody::from_form(&form, &WorkingSet::default()).to_json();
        assert!(body["generationConfig"].get("temperature").is_none());
        assert!(body["generationConfig"].get("topP").is_none());

        let form = FormFields {
            temperature: " 0.4 ".to_string(),
            top_p: "inf".to_string(),
            ..FormFields::default()
        };
        let body = RequestBody::from_form(&form, &WorkingSet::default()).to_json();
        assert_eq!(body["generationConfig"]["temperature"], json!(0.4));
        assert!(body["generationConfig"].get("topP").is_none());
    }

    #[test]
    fn image_config_only_when_set() {
        let form = FormFields {
            image_size: "2K".to_string(),
            system_prompt: "  be terse  ".to_string(),
            ..FormFields::default()
        };
        let body = RequestBody::from_form(&form, &WorkingSet::default()).to_json();
        assert_eq!(
            body["generationConfig"]["imageConfig"],
            json!({ "imageSize": "2K" })
        );
        assert_eq!(
            body["systemInstruction"],
            json!({ "parts": [{ "text": "be terse" }] })
        );
    }

    #[test]
    fn projection_accepts_both_inline_spellings() {
        let value = json!({
            "systemInstruction": { "parts": [{ "text": "sys" }] },
            "contents": [{ "parts": [
                { "inlineData": { "mimeType": "image/webp", "data": "AAAA" } },
                { "text": "first" },
                { "text": "second" },
                { "inline_data": { "data": "BBBB" } },
                { "inline_data": { "mime_type": "image/png", "data": "" } }
            ]}],
            "generationConfig": {
                "temperature": 0.5,
                "topP": "0.9",
                "imageConfig": { "aspectRatio": "16:9", "imageSize": 4 }
            }
        });
        let projection = project_json(&value);
        assert_eq!(projection.system_prompt.as_deref(), Some("sys"));
        assert_eq!(projection.prompt.as_deref(), Some("first"));
        assert_eq!(projection.images.len(), 2);
        assert_eq!(projection.images[0].mime_type, "image/webp");
        assert_eq!(projection.images[1].mime_type, "application/octet-stream");
        assert_eq!(projection.temperature, Some(0.5));
        assert_eq!(projection.top_p, None);
        assert_eq!(projection.aspect_ratio.as_deref(), Some("16:9"));
        assert_eq!(projection.image_size, None);
    }

    #[test]
    fn apply_projection_leaves_missing_fields_untouched() {
        let mut form = FormFields {
            prompt: "keep".to_string(),
            aspect_ratio: "1:1".to_string(),
            top_p: "0.8".to_string(),
            ..FormFields::default()
        };
        let applied = form.apply_projection(&JsonProjection {
            temperature: Some(1.0),
            ..JsonProjection::default()
        });
        assert_eq!(form.prompt, "keep");
        assert_eq!(form.aspect_ratio, "1:1");
        assert_eq!(form.top_p, "0.8");
        assert_eq!(form.temperature, "1");
        assert_eq!(applied.names(), vec!["temperature"]);
    }

    #[test]
    fn long_field_names_deserialize() -> anyhow::Result<()> {
        let parsed: FormFields =
            serde_json::from_value(json!({ "promptText": "p", "systemPromptText": "s" }))?;
        assert_eq!(parsed.prompt, "p");
        assert_eq!(parsed.system_prompt, "s");
        assert_eq!(parsed.top_p, "");
        Ok(())
    }
}
