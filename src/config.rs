use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::IdlerError;

pub const DEFAULT_CONFIG_PATH: &str = "badge-idler.toml";
pub const DEFAULT_BASE_URL: &str = "https://steamcommunity.com";

const DEFAULT_IDLE_TIME_SECS: u64 = 300;
const DEFAULT_MAX_CONCURRENT: usize = 1;

/// SteamID64の桁数（steamLoginSecureクッキーの先頭）
const STEAM_ID_LEN: usize = 17;

const CONFIG_TEMPLATE: &str = r#"# badge-idler 設定ファイル
#
# ブラウザでsteamcommunity.comにログインし、開発者ツールから
# sessionid と steamLoginSecure クッキーの値をコピーしてください。

[auth]
session_id = ""
steam_login_secure = ""
# steam_id = "76561198000000000"

[idle]
# 1ラウンドの放置時間（秒）
idle_time_secs = 300
# 同時に放置するゲーム数
max_concurrent = 1
# ワーカー停止後、再起動までの待機時間（秒）
settle_secs = 5
# ワーカー起動待ちのタイムアウト（秒）
startup_timeout_secs = 5
# ドロップ数が変わらなくてもワーカーを再起動する
restart_unchanged = true

[fetch]
# "http" または "browser"
backend = "http"
base_url = "https://steamcommunity.com"
timeout_secs = 30
headless = true
# debug_dir = "./data"

[worker]
# 省略時はプラットフォーム既定のsteam_apiライブラリ
# library_path = "./libsteam_api64.so"
quiet = true
"#;

/// Steamセッションクッキー
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub steam_login_secure: String,
    /// 省略時はsteamLoginSecureの先頭17文字
    #[serde(default)]
    pub steam_id: Option<String>,
}

impl AuthConfig {
    pub fn new(session_id: impl Into<String>, steam_login_secure: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            steam_login_secure: steam_login_secure.into(),
            steam_id: None,
        }
    }

    /// プロフィールURLに使うSteamID64
    pub fn steam_id(&self) -> Result<String, IdlerError> {
        if let Some(id) = self.steam_id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }

        let prefix: String = self.steam_login_secure.chars().take(STEAM_ID_LEN).collect();
        if prefix.len() != STEAM_ID_LEN || !prefix.chars().all(|c| c.is_ascii_digit()) {
            return Err(IdlerError::Config(
                "steam_login_secure からSteamIDを取得できません (auth.steam_id を指定してください)"
                    .into(),
            ));
        }
        Ok(prefix)
    }

    pub fn validate(&self) -> Result<(), IdlerError> {
        if self.session_id.trim().is_empty() {
            return Err(IdlerError::Config("«session_id» が設定されていません".into()));
        }
        if self.steam_login_secure.trim().is_empty() {
            return Err(IdlerError::Config(
                "«steam_login_secure» が設定されていません".into(),
            ));
        }
        self.steam_id().map(|_| ())
    }
}

/// 放置ループの設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    pub idle_time_secs: u64,
    pub max_concurrent: usize,
    pub settle_secs: u64,
    pub startup_timeout_secs: u64,
    pub restart_unchanged: bool,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            idle_time_secs: DEFAULT_IDLE_TIME_SECS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            settle_secs: 5,
            startup_timeout_secs: 5,
            restart_unchanged: true,
        }
    }
}

impl IdleConfig {
    /// 0は未設定扱い
    pub fn idle_time(&self) -> Duration {
        match self.idle_time_secs {
            0 => Duration::from_secs(DEFAULT_IDLE_TIME_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    /// 0は未設定扱い
    pub fn max_concurrent(&self) -> usize {
        match self.max_concurrent {
            0 => DEFAULT_MAX_CONCURRENT,
            n => n,
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchBackend {
    #[default]
    Http,
    Browser,
}

/// バッジページ取得の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub backend: FetchBackend,
    pub base_url: String,
    pub timeout_secs: u64,
    pub headless: bool,
    pub user_agent: Option<String>,
    /// スクレイプ結果(JSON)の保存先。デバッグ用
    pub debug_dir: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            backend: FetchBackend::Http,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            headless: true,
            user_agent: None,
            debug_dir: None,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub library_path: Option<PathBuf>,
    /// ワーカーのstderrを捨てる
    pub quiet: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            quiet: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdlerConfig {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub idle: IdleConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl IdlerConfig {
    pub fn new(session_id: impl Into<String>, steam_login_secure: impl Into<String>) -> Self {
        Self {
            auth: AuthConfig::new(session_id, steam_login_secure),
            ..Default::default()
        }
    }

    /// 設定ファイルを読み込む
    ///
    /// ファイルがなければテンプレートを書き出して `ConfigMissing` を返す
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IdlerError> {
        let path = path.as_ref();
        if !path.exists() {
            Self::write_template(path, false)?;
            return Err(IdlerError::ConfigMissing(path.to_path_buf()));
        }

        debug!("Loading config from {:?}", path);
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, IdlerError> {
        Ok(toml::from_str(text)?)
    }

    /// テンプレートを書き出す
    ///
    /// 既存のファイルは `overwrite` のときだけ上書きする
    pub fn write_template(path: impl AsRef<Path>, overwrite: bool) -> Result<(), IdlerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut options = std::fs::OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let mut file = options.open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => IdlerError::Config(format!(
                "{:?} は既に存在します。上書きするには --force を指定してください",
                path
            )),
            _ => IdlerError::FileIO(e),
        })?;
        file.write_all(CONFIG_TEMPLATE.as_bytes())?;

        info!("Wrote config template to {:?}", path);
        Ok(())
    }

    /// 環境変数でクッキーを上書き
    pub fn apply_env(self) -> Self {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    pub fn apply_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup("IDLER_SESSION_ID").filter(|v| !v.is_empty()) {
            self.auth.session_id = value;
        }
        if let Some(value) = lookup("IDLER_STEAM_LOGIN_SECURE").filter(|v| !v.is_empty()) {
            self.auth.steam_login_secure = value;
        }
        self
    }

    pub fn validate(&self) -> Result<(), IdlerError> {
        self.auth.validate()
    }

    pub fn with_idle_time(mut self, secs: u64) -> Self {
        self.idle.idle_time_secs = secs;
        self
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.idle.max_concurrent = n;
        self
    }

    pub fn with_backend(mut self, backend: FetchBackend) -> Self {
        self.fetch.backend = backend;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.fetch.headless = headless;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.fetch.base_url = base_url.into();
        self
    }

    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker.library_path = Some(path.into());
        self
    }
}
