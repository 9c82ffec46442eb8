//! Endpoint URL joining.

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Strip trailing slashes and surrounding whitespace from a base URL.
///
/// ```
/// use chatrelay::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url(" http://localhost:8080/v1/ "), "http://localhost:8080/v1");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Join a base URL and an endpoint path with exactly one slash.
///
/// ```
/// use chatrelay::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://api.openai.com/v1/", "/chat/completions"),
///     "https://api.openai.com/v1/chat/completions"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{normalized_base}/{endpoint}")
}
