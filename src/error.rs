use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdlerError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("設定ファイルがありません: {0:?} (テンプレートを作成しました。編集してから再実行してください)")]
    ConfigMissing(PathBuf),

    #[error("認証エラー: {0}")]
    Auth(String),

    #[error("通信エラー: {0}")]
    Network(String),

    #[error("解析エラー: {0}")]
    Parse(String),

    #[error("ブラウザ初期化エラー: {0}")]
    BrowserInit(String),

    #[error("ナビゲーションエラー: {0}")]
    Navigation(String),

    #[error("steam_apiライブラリを読み込めません: {0}")]
    Library(String),

    #[error("Steam APIを初期化できません (app_id={0})")]
    SessionInit(u32),

    #[error("未対応のプラットフォーム: {0}")]
    UnsupportedPlatform(String),

    #[error("ワーカーエラー (app_id={app_id}): {reason}")]
    Worker { app_id: u32, reason: String },

    #[error("ファイル操作エラー: {0}")]
    FileIO(#[from] std::io::Error),

    #[error("設定ファイル解析エラー: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSONエラー: {0}")]
    Json(#[from] serde_json::Error),
}

impl IdlerError {
    /// 実行全体を中断すべきエラーか
    ///
    /// 個別タイトルのスクレイプ失敗は次のラウンドで再試行する
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            IdlerError::Network(_) | IdlerError::Parse(_) | IdlerError::Navigation(_)
        )
    }
}
