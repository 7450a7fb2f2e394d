use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::Local;
use tower::Service;
use tracing::{debug, error, info};

use crate::badges::{self, total_cards, Badge};
use crate::config::IdlerConfig;
use crate::error::IdlerError;
use crate::traits::{BadgeSource, PageFetcher};

/// スクレイピングリクエスト
#[derive(Debug, Clone)]
pub enum ScrapeRequest {
    /// バッジ一覧（全ページ）から放置対象を集める
    Overview,
    /// 1ゲームの残りドロップ数を確認
    Drops(Badge),
}

/// スクレイピング結果
#[derive(Debug, Clone)]
pub enum ScrapeResponse {
    Overview(Vec<Badge>),
    Drops(u32),
}

/// tower::Serviceを実装したバッジスクレイパー
#[derive(Clone)]
pub struct ScrapeService {
    fetcher: Arc<dyn PageFetcher>,
    base_url: String,
    badges_url: String,
    debug_dir: Option<PathBuf>,
    debug: bool,
}

impl ScrapeService {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: &IdlerConfig) -> Result<Self, IdlerError> {
        let steam_id = config.auth.steam_id()?;
        Ok(Self {
            fetcher,
            base_url: config.fetch.base_url.clone(),
            badges_url: badges::badges_url(&config.fetch.base_url, &steam_id),
            debug_dir: config.fetch.debug_dir.clone(),
            debug: false,
        })
    }

    /// デバッグモードでは一覧を `debug_dir` にJSONで保存する
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn badges_url(&self) -> &str {
        &self.badges_url
    }

    pub fn fetcher(&self) -> &Arc<dyn PageFetcher> {
        &self.fetcher
    }

    async fn scrape_overview(self) -> Result<Vec<Badge>, IdlerError> {
        let first = badges::parse_badge_list(&self.fetcher.fetch(&self.badges_url).await?)?;
        if !first.authenticated {
            return Err(IdlerError::Auth(
                "Steamにログインできません。クッキーを確認してください".into(),
            ));
        }
        debug!("Badge pages: {}", first.page_count);

        let mut found = first.badges;
        for page in 2..=first.page_count {
            let url = badges::page_url(&self.badges_url, page);
            let parsed = badges::parse_badge_list(&self.fetcher.fetch(&url).await?)?;
            found.extend(parsed.badges);
        }

        for badge in &mut found {
            badge.url = badges::resolve_url(&self.base_url, &badge.url);
        }

        // 同じゲームが複数ページに出ることがある
        let mut seen = std::collections::HashSet::new();
        found.retain(|badge| seen.insert(badge.app_id));

        info!(
            "Idle Master needs to idle {} games for {} cards",
            found.len(),
            total_cards(&found)
        );

        if let Some(dir) = self.debug_dir.as_ref().filter(|_| self.debug) {
            save_overview(dir, &found).await;
        }

        Ok(found)
    }

    async fn scrape_drops(self, badge: Badge) -> Result<u32, IdlerError> {
        debug!("Check cards left for «{}» game", badge.title);
        let html = self.fetcher.fetch(&badge.url).await?;
        badges::parse_drops_left(&html)
    }

    async fn dispatch(self, req: ScrapeRequest) -> Result<ScrapeResponse, IdlerError> {
        match req {
            ScrapeRequest::Overview => self.scrape_overview().await.map(ScrapeResponse::Overview),
            ScrapeRequest::Drops(badge) => self.scrape_drops(badge).await.map(ScrapeResponse::Drops),
        }
    }
}

/// スクレイプ結果をファイルに保存
async fn save_overview(dir: &Path, found: &[Badge]) {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let filename = dir.join(format!("badges_{}.json", timestamp));

    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        error!("Failed to create debug directory: {}", e);
        return;
    }

    match serde_json::to_string_pretty(found) {
        Ok(json) => {
            if let Err(e) = tokio::fs::write(&filename, json).await {
                error!("Failed to save badge list: {}", e);
            } else {
                info!("Saved badge list to {:?}", filename);
            }
        }
        Err(e) => error!("Failed to serialize badge list: {}", e),
    }
}

impl Service<ScrapeRequest> for ScrapeService {
    type Response = ScrapeResponse;
    type Error = IdlerError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ScrapeRequest) -> Self::Future {
        Box::pin(self.clone().dispatch(req))
    }
}

#[async_trait]
impl BadgeSource for ScrapeService {
    async fn overview(&self) -> Result<Vec<Badge>, IdlerError> {
        match self.clone().call(ScrapeRequest::Overview).await? {
            ScrapeResponse::Overview(found) => Ok(found),
            ScrapeResponse::Drops(_) => Err(IdlerError::Parse("unexpected response".into())),
        }
    }

    async fn drops_left(&self, badge: &Badge) -> Result<u32, IdlerError> {
        match self.clone().call(ScrapeRequest::Drops(badge.clone())).await? {
            ScrapeResponse::Drops(n) => Ok(n),
            ScrapeResponse::Overview(_) => Err(IdlerError::Parse("unexpected response".into())),
        }
    }
}
