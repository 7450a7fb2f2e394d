use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::badges::Badge;
use crate::error::IdlerError;
use crate::worker::WorkerEvent;

/// ページ取得（クッキー付き）
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// URLのHTMLを取得
    async fn fetch(&self, url: &str) -> Result<String, IdlerError>;

    /// リソース解放
    async fn close(&self) -> Result<(), IdlerError> {
        Ok(())
    }
}

/// 放置対象とドロップ数の取得元
#[async_trait]
pub trait BadgeSource: Send + Sync {
    /// ドロップが残っている全ゲーム
    async fn overview(&self) -> Result<Vec<Badge>, IdlerError>;

    /// 1ゲームの残りドロップ数
    async fn drops_left(&self, badge: &Badge) -> Result<u32, IdlerError>;
}

/// 放置ワーカーの起動
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// ワーカーを起動する
    ///
    /// 起動後の異常終了は `events` に送られる
    async fn launch(
        &self,
        badge: &Badge,
        events: UnboundedSender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerHandle>, IdlerError>;
}

/// 起動中のワーカー
#[async_trait]
pub trait WorkerHandle: Send {
    fn app_id(&self) -> u32;

    /// まだ動いているか
    fn is_running(&mut self) -> bool;

    /// 停止して終了を待つ
    async fn stop(&mut self) -> Result<(), IdlerError>;
}
