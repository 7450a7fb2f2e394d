//! ページ取得モジュール
//!
//! - `HttpFetcher`: reqwestでクッキー付きGET
//! - `BrowserFetcher`: Chromiumでクッキーを設定して描画後のHTMLを取得

mod browser;
mod http;

pub use browser::BrowserFetcher;
pub use http::HttpFetcher;

use std::sync::Arc;

use crate::config::{AuthConfig, FetchBackend, FetchConfig};
use crate::error::IdlerError;
use crate::traits::PageFetcher;

/// 設定に応じたフェッチャーを作成
pub fn fetcher_from_config(
    config: &FetchConfig,
    auth: &AuthConfig,
    debug: bool,
) -> Result<Arc<dyn PageFetcher>, IdlerError> {
    Ok(match config.backend {
        FetchBackend::Http => Arc::new(HttpFetcher::new(config, auth)?),
        FetchBackend::Browser => {
            Arc::new(BrowserFetcher::new(config.clone(), auth.clone()).with_debug(debug))
        }
    })
}
