use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, USER_AGENT};
use reqwest::Client;
use tracing::debug;

use crate::config::{AuthConfig, FetchConfig};
use crate::error::IdlerError;
use crate::traits::PageFetcher;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// reqwestによるページ取得
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

/// Cookieヘッダの値
pub(crate) fn cookie_header(auth: &AuthConfig) -> String {
    format!(
        "sessionid={}; steamLoginSecure={}",
        auth.session_id.trim(),
        auth.steam_login_secure.trim()
    )
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig, auth: &AuthConfig) -> Result<Self, IdlerError> {
        let mut headers = HeaderMap::new();
        let cookie = HeaderValue::from_str(&cookie_header(auth))
            .map_err(|e| IdlerError::Config(format!("クッキーに使えない文字があります: {}", e)))?;
        headers.insert(COOKIE, cookie);

        let user_agent = config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        let user_agent = HeaderValue::from_str(user_agent)
            .map_err(|e| IdlerError::Config(format!("user_agent: {}", e)))?;
        headers.insert(USER_AGENT, user_agent);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()
            .map_err(|e| IdlerError::Network(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, IdlerError> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IdlerError::Network(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IdlerError::Network(format!("{}: HTTP {}", url, status)));
        }

        response
            .text()
            .await
            .map_err(|e| IdlerError::Network(format!("{}: {}", url, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_header() {
        let auth = AuthConfig::new(" abc123 ", "76561198000000001%7C%7Ctoken");
        assert_eq!(
            cookie_header(&auth),
            "sessionid=abc123; steamLoginSecure=76561198000000001%7C%7Ctoken"
        );
    }

    #[test]
    fn test_rejects_invalid_cookie() {
        let auth = AuthConfig::new("abc\n123", "76561198000000001%7C%7Ctoken");
        let err = HttpFetcher::new(&FetchConfig::default(), &auth).unwrap_err();
        assert!(matches!(err, IdlerError::Config(_)));
    }
}
