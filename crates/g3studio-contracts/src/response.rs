use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};
use serde_json::Value;

use crate::codec::{classify_extension, decode_base64};
use crate::request::InlineImage;

pub const IMAGE_FILE_PREFIX: &str = "gemini3_image";
pub const DEFAULT_RESPONSE_MIME: &str = "image/png";
pub const TEXT_SEPARATOR: &str = "\n\n---\n\n";

/// One completed attempt, split into its text and image fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseResult {
    pub texts: Vec<String>,
    pub images: Vec<InlineImage>,
    pub raw_payload: Value,
    pub latency_ms: f64,
    batch_tag: String,
}

impl ResponseResult {
    pub fn from_payload(raw_payload: Value, latency_ms: f64) -> Self {
        Self::from_payload_at(raw_payload, latency_ms, &Local::now())
    }

    /// The batch tag is fixed here, so every image of this result shares it.
    pub fn from_payload_at<Tz: TimeZone>(
        raw_payload: Value,
        latency_ms: f64,
        at: &DateTime<Tz>,
    ) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        let (texts, images) = interpret(&raw_payload);
        Self {
            texts,
            images,
            raw_payload,
            latency_ms,
            batch_tag: batch_tag(at),
        }
    }

    pub fn batch_tag(&self) -> &str {
        &self.batch_tag
    }

    pub fn latency_display(&self) -> String {
        format!("{} ms", self.latency_ms.round() as u64)
    }

    pub fn joined_text(&self) -> String {
        self.texts.join(TEXT_SEPARATOR)
    }

    pub fn image_file_names(&self) -> Vec<String> {
        self.images
            .iter()
            .enumerate()
            .map(|(idx, image)| image_file_name(&self.batch_tag, idx, &image.mime_type))
            .collect()
    }

    /// Decodes every image into `dir` under its derived file name. A failed
    /// image is reported alongside the others instead of aborting the batch.
    pub fn write_images(&self, dir: &Path) -> SavedImages {
        let mut saved = SavedImages::default();
        if self.images.is_empty() {
            return saved;
        }
        let dir_error = std::fs::create_dir_all(dir).err();
        for (image, file_name) in self.images.iter().zip(self.image_file_names()) {
            let written = match &dir_error {
                Some(err) => Err(format!("cannot create {}: {err}", dir.display())),
                None => write_image(image, &dir.join(&file_name)),
            };
            match written {
                Ok(image) => saved.written.push(image),
                Err(reason) => {
                    tracing::warn!(file = %file_name, "response image not saved: {reason}");
                    saved.failed.push(ImageWriteFailure { file_name, reason });
                }
            }
        }
        saved
    }

    pub fn raw_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.raw_payload).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImage {
    pub path: PathBuf,
    pub mime_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageWriteFailure {
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedImages {
    pub written: Vec<SavedImage>,
    pub failed: Vec<ImageWriteFailure>,
}

fn write_image(image: &InlineImage, path: &Path) -> Result<SavedImage, String> {
    let bytes = decode_base64(&image.data).map_err(|err| err.to_string())?;
    std::fs::write(path, &bytes).map_err(|err| format!("cannot write {}: {err}", path.display()))?;
    Ok(SavedImage {
        path: path.to_path_buf(),
        mime_type: image.mime_type.clone(),
        size: bytes.len() as u64,
    })
}

/// Reads the first candidate only. Parts that are neither text nor inline data are skipped.
pub fn interpret(payload: &Value) -> (Vec<String>, Vec<InlineImage>) {
    let parts = payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let mut texts = Vec::new();
    let mut images = Vec::new();

    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if !text.trim().is_empty() {
                texts.push(text.to_string());
                continue;
            }
        }
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .filter(|mime| !mime.is_empty())
            .unwrap_or(DEFAULT_RESPONSE_MIME);
        images.push(InlineImage {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        });
    }
    (texts, images)
}

/// Structured `error.message` of a failed response, if the server sent one.
pub fn error_message(payload: &Value) -> Option<String> {
    payload
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

/// Local wall-clock tag used in downloaded and exported file names.
pub fn current_batch_tag() -> String {
    batch_tag(&Local::now())
}

pub fn batch_tag<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%Y%m%d_%H%M%S").to_string()
}

pub fn image_file_name(batch_tag: &str, idx: usize, mime_type: &str) -> String {
    format!(
        "{IMAGE_FILE_PREFIX}_{batch_tag}_{:02}.{}",
        idx + 1,
        classify_extension(mime_type)
    )
}
