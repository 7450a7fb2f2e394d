//! バッジスクレイプのテスト
//!
//! 実行方法:
//! ```
//! STEAM_SESSION_ID=... STEAM_LOGIN_SECURE=... cargo run --example scrape_test
//! ```
//!
//! `STEAM_BACKEND=browser` でChromium経由の取得を試す

use badge_idler::fetch::fetcher_from_config;
use badge_idler::{BadgeSource, FetchBackend, IdlerConfig, PageFetcher, ScrapeService};

#[tokio::main]
async fn main() {
    // ログ設定
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // 環境変数から認証情報を取得
    let session_id = std::env::var("STEAM_SESSION_ID")
        .expect("STEAM_SESSION_ID environment variable not set");
    let login_secure = std::env::var("STEAM_LOGIN_SECURE")
        .expect("STEAM_LOGIN_SECURE environment variable not set");
    let backend = match std::env::var("STEAM_BACKEND").as_deref() {
        Ok("browser") => FetchBackend::Browser,
        _ => FetchBackend::Http,
    };

    let config = IdlerConfig::new(session_id, login_secure)
        .with_backend(backend)
        .with_headless(false); // デバッグ用に表示モード

    println!("=== Badge Scrape Test ({:?}) ===", backend);

    let fetcher = fetcher_from_config(&config.fetch, &config.auth, true)
        .expect("Failed to create fetcher");
    let service = ScrapeService::new(fetcher.clone(), &config)
        .expect("Invalid cookies")
        .with_debug(true);
    println!("Badges URL: {}", service.badges_url());

    match service.overview().await {
        Ok(badges) => {
            for (i, badge) in badges.iter().enumerate() {
                println!(
                    "{}. {} ({}) - {} cards",
                    i + 1,
                    badge.title,
                    badge.app_id,
                    badge.drops_left
                );
            }

            // 1件目は個別ページも確認
            if let Some(first) = badges.first() {
                match service.drops_left(first).await {
                    Ok(n) => println!("Recheck «{}»: {} cards", first.title, n),
                    Err(e) => eprintln!("Recheck failed: {}", e),
                }
            }
        }
        Err(e) => {
            eprintln!("エラー: {}", e);
        }
    }

    let _ = fetcher.close().await;
}
