use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{ClientError, ClientResult};

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Input is encoded in slices of this many bytes. A multiple of three keeps every
/// slice but the last free of padding, so the concatenation matches a one-shot encode.
pub const ENCODE_CHUNK_BYTES: usize = 3 * 0x2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime_type: String,
    pub base64_data: String,
}

pub fn encode_base64(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(ENCODE_CHUNK_BYTES) {
        BASE64.encode_string(chunk, &mut out);
    }
    out
}

pub fn decode_base64(data: &str) -> ClientResult<Vec<u8>> {
    let compact: String = data.chars().filter(|ch| !ch.is_ascii_whitespace()).collect();
    Ok(BASE64.decode(compact.as_bytes())?)
}

/// Splits `data:[<mime>];base64,<payload>`.
pub fn decode_data_uri(uri: &str) -> ClientResult<DataUri> {
    let rest = uri
        .trim()
        .strip_prefix("data:")
        .ok_or(ClientError::MalformedDataUri)?;
    let (mime, payload) = rest
        .split_once(";base64,")
        .ok_or(ClientError::MalformedDataUri)?;
    let mime = mime.trim();
    Ok(DataUri {
        mime_type: if mime.is_empty() {
            OCTET_STREAM.to_string()
        } else {
            mime.to_string()
        },
        base64_data: payload.to_string(),
    })
}

pub fn encode_data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", encode_base64(bytes))
}

pub fn classify_extension(mime_type: &str) -> &'static str {
    let lowered = mime_type.to_ascii_lowercase();
    if lowered.contains("png") {
        return "png";
    }
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    "bin"
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

/// Extension first, then the content signature, then octet-stream.
pub fn sniff_mime(path: &Path, bytes: &[u8]) -> String {
    if let Some(mime) = mime_for_path(path) {
        return mime.to_string();
    }
    image::guess_format(bytes)
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|_| OCTET_STREAM.to_string())
}

pub fn humanize_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut idx = 0;
    while value >= 1024.0 && idx < UNITS.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    let decimals = if idx == 0 || value >= 10.0 { 0 } else { 1 };
    format!("{value:.decimals$} {}", UNITS[idx])
}
