use std::env;
use std::time::Duration;

pub const STATE_FILE_NAME: &str = "state.json";
pub const PREVIEW_DIR_NAME: &str = "previews";

pub const DEFAULT_REQUEST_TIMEOUT_S: u64 = 300;
const MIN_REQUEST_TIMEOUT_S: u64 = 15;
const MAX_REQUEST_TIMEOUT_S: u64 = 600;

const API_KEY_ENV_VARS: &[&str] = &["G3STUDIO_API_KEY", "GEMINI_API_KEY"];

/// `G3STUDIO_REQUEST_TIMEOUT`, clamped to 15..=600 seconds.
pub fn request_timeout() -> Duration {
    parse_request_timeout(env::var("G3STUDIO_REQUEST_TIMEOUT").ok().as_deref())
}

pub fn parse_request_timeout(raw: Option<&str>) -> Duration {
    let seconds = raw
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_S)
        .clamp(MIN_REQUEST_TIMEOUT_S, MAX_REQUEST_TIMEOUT_S);
    Duration::from_secs(seconds)
}

pub fn api_key_from_env() -> Option<String> {
    first_non_empty(API_KEY_ENV_VARS.iter().map(|name| env::var(name).ok()))
}

fn first_non_empty(values: impl Iterator<Item = Option<String>>) -> Option<String> {
    values
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_defaults_and_clamps() {
        assert_eq!(parse_request_timeout(None), Duration::from_secs(300));
        assert_eq!(parse_request_timeout(Some("nope")), Duration::from_secs(300));
        assert_eq!(parse_request_timeout(Some("1")), Duration::from_secs(15));
        assert_eq!(parse_request_timeout(Some(" 90 ")), Duration::from_secs(90));
        assert_eq!(parse_request_timeout(Some("9000")), Duration::from_secs(600));
    }

    #[test]
    fn first_non_empty_skips_blank_values() {
        let picked = first_non_empty(
            vec![None, Some("  ".to_string()), Some(" key ".to_string())].into_iter(),
        );
        assert_eq!(picked.as_deref(), Some("key"));
        assert_eq!(first_non_empty(vec![None, None].into_iter()), None);
    }
}
