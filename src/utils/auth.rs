//! Authentication utilities for API requests

/// Add the bearer credential to an HTTP request
///
/// An empty key sends no `Authorization` header, which is what local
/// OpenAI-compatible servers expect.
pub fn add_auth_headers(request: reqwest::RequestBuilder, api_key: &str) -> reqwest::RequestBuilder {
    if api_key.is_empty() {
        return request;
    }
    request.header("Authorization", format!("Bearer {api_key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_auth_header() {
        let client = reqwest::Client::new();
        let request = add_auth_headers(client.get("https://example.com"), "test-key")
            .build()
            .unwrap();

        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "Bearer test-key"
        );
    }

    #[test]
    fn test_empty_key_sends_no_auth_header() {
        let client = reqwest::Client::new();
        let request = add_auth_headers(client.get("https://example.com"), "")
            .build()
            .unwrap();

        assert!(request.headers().get("authorization").is_none());
    }
}
