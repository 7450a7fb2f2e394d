use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{AuthConfig, FetchConfig};
use crate::error::IdlerError;
use crate::traits::PageFetcher;

/// ログイン済みページの目印
const AUTH_MARKER: &str = "user_avatar";

/// Chromium経由のページ取得
///
/// ブラウザは最初の取得時に起動する
pub struct BrowserFetcher {
    config: FetchConfig,
    auth: AuthConfig,
    debug: bool,
    browser: Mutex<Option<Browser>>,
}

/// クッキーを設定するドメイン
fn cookie_domain(base_url: &str) -> Result<String, IdlerError> {
    let url = reqwest::Url::parse(base_url)
        .map_err(|e| IdlerError::Config(format!("base_url {}: {}", base_url, e)))?;
    url.host_str()
        .map(str::to_string)
        .ok_or_else(|| IdlerError::Config(format!("base_url にホストがありません: {}", base_url)))
}

impl BrowserFetcher {
    pub fn new(config: FetchConfig, auth: AuthConfig) -> Self {
        Self {
            config,
            auth,
            debug: false,
            browser: Mutex::new(None),
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// ブラウザを起動
    async fn launch(&self) -> Result<Browser, IdlerError> {
        info!("Launching browser for badge scraping...");

        // Chrome パスを取得
        let chrome_path = std::env::var("CHROME_PATH")
            .or_else(|_| std::env::var("CHROMIUM_PATH"))
            .unwrap_or_else(|_| "chromium".to_string());

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(1280, 800);

        if !self.config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .no_sandbox()
            .request_timeout(self.config.timeout())
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");

        if let Some(user_agent) = &self.config.user_agent {
            builder = builder.arg(format!("--user-agent={}", user_agent));
        }

        let browser_config = builder
            .build()
            .map_err(|e| IdlerError::BrowserInit(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| IdlerError::BrowserInit(e.to_string()))?;

        // ハンドラータスクを起動
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Browser event: {:?}", event);
            }
        });

        info!("Browser launched");
        Ok(browser)
    }

    /// セッションクッキーを設定
    async fn set_cookies(&self, page: &Page) -> Result<(), IdlerError> {
        let domain = cookie_domain(&self.config.base_url)?;
        let cookies = [
            ("sessionid", self.auth.session_id.trim()),
            ("steamLoginSecure", self.auth.steam_login_secure.trim()),
        ];

        for (name, value) in cookies {
            let param = CookieParam::builder()
                .name(name)
                .value(value)
                .domain(&domain)
                .path("/")
                .secure(true)
                .build()
                .map_err(|e| IdlerError::BrowserInit(format!("クッキー設定エラー: {}", e)))?;

            page.set_cookie(param)
                .await
                .map_err(|e| IdlerError::BrowserInit(format!("クッキー設定エラー: {}", e)))?;
        }
        Ok(())
    }

    async fn load(&self, page: &Page, url: &str) -> Result<String, IdlerError> {
        self.set_cookies(page).await?;

        page.goto(url)
            .await
            .map_err(|e| IdlerError::Navigation(format!("{}: {}", url, e)))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| IdlerError::Navigation(format!("{}: {}", url, e)))?;

        let html = page
            .content()
            .await
            .map_err(|e| IdlerError::Navigation(format!("{}: {}", url, e)))?;

        // デバッグスクリーンショット
        if self.debug && !html.contains(AUTH_MARKER) {
            if let Ok(screenshot) = page
                .screenshot(ScreenshotParams::builder().full_page(true).build())
                .await
            {
                use base64::Engine;
                let encoded = base64::engine::general_purpose::STANDARD.encode(&screenshot);
                debug!("Not logged in, screenshot: data:image/png;base64,{}", encoded);
            }
        }

        Ok(html)
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<String, IdlerError> {
        let mut guard = self.browser.lock().await;
        if guard.is_none() {
            *guard = Some(self.launch().await?);
        }
        let browser = guard
            .as_ref()
            .ok_or_else(|| IdlerError::BrowserInit("Browser not initialized".to_string()))?;

        debug!("Browser GET {}", url);
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| IdlerError::BrowserInit(e.to_string()))?;

        let result = self.load(&page, url).await;

        // ページを閉じる
        if let Err(e) = page.close().await {
            debug!("Failed to close page: {}", e);
        }

        // 次のリクエストまで少し待つ
        tokio::time::sleep(Duration::from_millis(500)).await;
        result
    }

    async fn close(&self) -> Result<(), IdlerError> {
        info!("Closing browser...");
        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                debug!("Failed to close browser: {}", e);
            }
        }
        Ok(())
    }
}
