//! Endpoint construction shared by the provider adapters.

/// Strips trailing slashes so endpoint joins never produce `//`.
///
/// ```
/// use palaver::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://api.example.com/v1///"), "https://api.example.com/v1");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Joins a base URL and an endpoint path.
///
/// ```
/// use palaver::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://api.example.com/v1/", "/chat/completions"),
///     "https://api.example.com/v1/chat/completions"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// Builds a Google-style method URL: `{base}/models/{model}:{method}`.
///
/// Model codes may already carry the `models/` prefix returned by the model
/// listing endpoint.
pub fn construct_model_method_url(base_url: &str, model: &str, method: &str) -> String {
    let model = model.trim().trim_start_matches("models/");
    construct_api_url(base_url, &format!("models/{model}:{method}"))
}
