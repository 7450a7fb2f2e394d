//! 放置ワーカー
//!
//! 1ゲームにつき1プロセス。子プロセスは steam_api を読み込んで
//! `SteamAPI_Init` を呼び、停止指示（標準入力の `0` かEOF）まで待機する。
//! 親プロセス側の起動と監視は `ProcessLauncher` が行う

mod native;
mod process;

pub use native::{default_library_path, SteamApi};
pub use process::{ProcessLauncher, ProcessWorker};

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::config::WorkerConfig;
use crate::error::IdlerError;

/// 初期化完了の合図（子プロセスの標準出力）
pub const READY: &str = "ready";
/// 停止指示（子プロセスの標準入力）
pub const STOP: &str = "0";

pub const EXIT_OK: i32 = 0;
pub const EXIT_LIBRARY: i32 = 2;
pub const EXIT_SESSION_INIT: i32 = 3;
pub const EXIT_PLATFORM: i32 = 4;
pub const EXIT_OTHER: i32 = 1;

/// ワーカーから監視側へのエラー通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// 停止指示なしに終了した
    Failed { app_id: u32, reason: String },
}

impl WorkerEvent {
    pub fn app_id(&self) -> u32 {
        match self {
            WorkerEvent::Failed { app_id, .. } => *app_id,
        }
    }

    pub fn into_error(self) -> IdlerError {
        match self {
            WorkerEvent::Failed { app_id, reason } => IdlerError::Worker { app_id, reason },
        }
    }
}

/// 設定のライブラリパス、なければプラットフォーム既定
pub fn resolve_library_path(config: &WorkerConfig) -> Result<PathBuf, IdlerError> {
    match &config.library_path {
        Some(path) => Ok(path.clone()),
        None => default_library_path(),
    }
}

/// 子プロセスの終了コード
pub fn exit_code(error: &IdlerError) -> i32 {
    match error {
        IdlerError::Library(_) => EXIT_LIBRARY,
        IdlerError::SessionInit(_) => EXIT_SESSION_INIT,
        IdlerError::UnsupportedPlatform(_) => EXIT_PLATFORM,
        _ => EXIT_OTHER,
    }
}

/// 終了コードから親プロセス側のエラーを復元
pub fn error_from_exit(app_id: u32, code: Option<i32>) -> IdlerError {
    match code {
        Some(EXIT_LIBRARY) => IdlerError::Library(
            "ワーカーがsteam_apiを読み込めませんでした。ライブラリの場所を確認してください".into(),
        ),
        Some(EXIT_SESSION_INIT) => IdlerError::SessionInit(app_id),
        Some(EXIT_PLATFORM) => IdlerError::UnsupportedPlatform(std::env::consts::OS.to_string()),
        Some(code) => IdlerError::Worker {
            app_id,
            reason: format!("exit code {}", code),
        },
        None => IdlerError::Worker {
            app_id,
            reason: "killed by signal".into(),
        },
    }
}

/// 停止指示まで待機
///
/// `ready` を書いてから、入力が `0` かEOFになるまで読み続ける
pub async fn serve_until_stopped<R, W>(input: R, mut output: W) -> Result<(), IdlerError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(format!("{}\n", READY).as_bytes()).await?;
    output.flush().await?;

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        debug!("Receive signal: {}", line.trim());
        if line.trim() == STOP {
            break;
        }
    }
    Ok(())
}

/// ワーカープロセス本体
pub async fn run_worker<R, W>(
    app_id: u32,
    library: &Path,
    input: R,
    output: W,
) -> Result<(), IdlerError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut api = SteamApi::load(library)?;
    api.init(app_id)?;

    let served = serve_until_stopped(input, output).await;
    api.shutdown();
    served
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serve_stops_on_zero() {
        let input: &[u8] = b"1\n0\nignored\n";
        let mut output = Vec::new();
        serve_until_stopped(input, &mut output).await.unwrap();
        assert_eq!(output, b"ready\n");
    }

    #[tokio::test]
    async fn test_serve_stops_on_eof() {
        let input: &[u8] = b"";
        let mut output = Vec::new();
        serve_until_stopped(input, &mut output).await.unwrap();
        assert_eq!(String::from_utf8(output).unwrap().trim(), READY);
    }

    #[tokio::test]
    async fn test_run_worker_without_library() {
        let input: &[u8] = b"";
        let mut output = Vec::new();
        let err = run_worker(440, Path::new("./missing/libsteam_api.so"), input, &mut output)
            .await
            .unwrap_err();

        assert_eq!(exit_code(&err), EXIT_LIBRARY);
        assert!(output.is_empty());
    }

    #[test]
    fn test_exit_code_round_trip() {
        assert!(matches!(
            error_from_exit(440, Some(exit_code(&IdlerError::SessionInit(440)))),
            IdlerError::SessionInit(440)
        ));
        assert!(matches!(
            error_from_exit(440, Some(EXIT_LIBRARY)),
            IdlerError::Library(_)
        ));
        assert!(matches!(
            error_from_exit(440, None),
            IdlerError::Worker { app_id: 440, .. }
        ));
    }

    #[test]
    fn test_resolve_library_path_prefers_config() {
        let config = WorkerConfig {
            library_path: Some(PathBuf::from("/opt/steam_api.so")),
            quiet: true,
        };
        assert_eq!(
            resolve_library_path(&config).unwrap(),
            PathBuf::from("/opt/steam_api.so")
        );
    }
}
