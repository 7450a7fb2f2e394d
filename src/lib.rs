//! Steamトレーディングカード放置ライブラリ
//!
//! - バッジページをスクレイプしてカードドロップが残っているゲームを探す
//! - ゲームごとにワーカープロセスを起動し、steam_api の `SteamAPI_Init` でプレイ中にする
//! - 一定時間ごとに残りドロップ数を確認して、ワーカーを再起動・終了する
//!
//! # 使用例
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use badge_idler::fetch::fetcher_from_config;
//! use badge_idler::{IdlerConfig, ProcessLauncher, ScrapeService, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), badge_idler::IdlerError> {
//!     let config = IdlerConfig::load("badge-idler.toml")?.apply_env();
//!     config.validate()?;
//!
//!     let fetcher = fetcher_from_config(&config.fetch, &config.auth, false)?;
//!     let service = ScrapeService::new(fetcher, &config)?;
//!     let launcher = ProcessLauncher::new(&config)?;
//!
//!     let mut supervisor =
//!         Supervisor::new(Arc::new(service), Arc::new(launcher), config.idle.clone());
//!     let summary = supervisor.run().await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```
//!
//! # スクレイプのみ
//!
//! ```rust,ignore
//! use badge_idler::{BadgeSource, ScrapeService};
//!
//! let badges = service.overview().await?;
//! for badge in &badges {
//!     println!("{} ({}): {} cards", badge.title, badge.app_id, badge.drops_left);
//! }
//! ```

pub mod badges;
pub mod config;
pub mod error;
pub mod fetch;
pub mod service;
pub mod supervisor;
pub mod traits;
pub mod worker;

// 主要な型をリエクスポート
pub use badges::{Badge, BadgePage};
pub use config::{FetchBackend, IdlerConfig};
pub use error::IdlerError;
pub use service::{ScrapeRequest, ScrapeResponse, ScrapeService};
pub use supervisor::{IdleSummary, Supervisor};
pub use traits::{BadgeSource, PageFetcher, WorkerHandle, WorkerLauncher};
pub use worker::{ProcessLauncher, WorkerEvent};
