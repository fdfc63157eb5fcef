use std::collections::HashSet;

use serde_json::Value;

use super::Preset;
use crate::request::{FormFields, RequestMode};

pub const IMPORT_SUFFIX_OPEN: &str = "（导入";
pub const IMPORT_SUFFIX_CLOSE: &str = "）";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    pub merged: Vec<Preset>,
    pub added_count: usize,
}

/// Appends every named incoming entry after `existing`, renaming on collision.
/// Unknown keys (image data included) are dropped; missing fields become "".
pub fn import_merge(existing: &[Preset], incoming: &[Value], now: &str) -> ImportOutcome {
    let mut taken: HashSet<String> = existing.iter().map(|preset| preset.name.clone()).collect();
    let mut merged = existing.to_vec();
    let mut added_count = 0;

    for entry in incoming {
        let Some(name) = entry
            .get("name")
            .and_then(scalar_text)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
        else {
            tracing::debug!("skipping imported preset without a name");
            continue;
        };
        let name = disambiguate(&name, &taken);

        let preset = Preset {
            name: name.clone(),
            created_at: entry
                .get("createdAt")
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .unwrap_or(now)
                .to_string(),
            updated_at: now.to_string(),
            mode: entry
                .get("mode")
                .and_then(Value::as_str)
                .map(RequestMode::parse_lenient)
                .unwrap_or_default(),
            fields: fields_from_value(entry.get("fields")),
            request_body_json: entry
                .get("requestBodyJson")
                .or_else(|| entry.get("rawJsonText"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };
        taken.insert(name);
        merged.push(preset);
        added_count += 1;
    }

    ImportOutcome {
        merged,
        added_count,
    }
}

fn disambiguate(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }
    (1..)
        .map(|idx| format!("{name}{IMPORT_SUFFIX_OPEN}{idx}{IMPORT_SUFFIX_CLOSE}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn fields_from_value(value: Option<&Value>) -> FormFields {
    let field = |camel: &str, alias: &str| -> String {
        value
            .and_then(|fields| fields.get(camel).or_else(|| fields.get(alias)))
            .and_then(scalar_text)
            .unwrap_or_default()
    };
    FormFields {
        system_prompt: field("systemPrompt", "systemPromptText"),
        prompt: field("prompt", "promptText"),
        aspect_ratio: field("aspectRatio", "aspect_ratio"),
        image_size: field("imageSize", "image_size"),
        temperature: field("temperature", "temperature"),
        top_p: field("topP", "top_p"),
    }
}
