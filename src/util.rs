const API_KEY: &str = "MACKEREL_APIKEY";

pub fn get_api_key() -> Option<String> {
    let key_from_env = std::env::var(API_KEY);
    key_from_env.ok().filter(|key| !key.is_empty())
}

const BACKEND_URL: &str = "MACKEREL_API_URL";

const DEFAULT_BACKEND_URL: &str = "https://api.mackerelio.com";

pub fn get_default_backend_url() -> String {
    let url_from_env = std::env::var(BACKEND_URL);
    url_from_env.unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string())
}
