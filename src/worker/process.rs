use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn, Instrument};

use super::{error_from_exit, resolve_library_path, WorkerEvent, READY, STOP};
use crate::badges::Badge;
use crate::config::IdlerConfig;
use crate::error::IdlerError;
use crate::traits::{WorkerHandle, WorkerLauncher};

/// 停止指示後に終了を待つ時間
const STOP_GRACE: Duration = Duration::from_secs(3);

type OutputLines = Lines<BufReader<ChildStdout>>;

/// 自分自身を `worker` サブコマンドで起動するランチャー
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    library: PathBuf,
    quiet: bool,
    debug: bool,
    startup_timeout: Duration,
}

impl ProcessLauncher {
    pub fn new(config: &IdlerConfig) -> Result<Self, IdlerError> {
        Ok(Self {
            program: std::env::current_exe()?,
            library: resolve_library_path(&config.worker)?,
            quiet: config.worker.quiet,
            debug: false,
            startup_timeout: config.idle.startup_timeout(),
        })
    }

    /// 起動する実行ファイルを差し替える
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_startup_timeout(mut self, startup_timeout: Duration) -> Self {
        self.startup_timeout = startup_timeout;
        self
    }

    pub fn library(&self) -> &PathBuf {
        &self.library
    }

    fn command(&self, app_id: u32) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("worker")
            .arg(app_id.to_string())
            .arg("--library")
            .arg(&self.library)
            // SteamAPI_Init はプロセスの環境変数からゲームを決める
            .env("SteamAppId", app_id.to_string())
            .env("SteamGameId", app_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if self.quiet {
                Stdio::null()
            } else {
                Stdio::inherit()
            })
            .kill_on_drop(true);

        if self.debug {
            cmd.arg("--debug");
        }
        cmd
    }
}

/// `ready` が届くまで読み飛ばす
///
/// ライブラリが初期化中に標準出力へ書くことがある。EOFなら `false`
async fn wait_ready(lines: &mut OutputLines) -> std::io::Result<bool> {
    while let Some(line) = lines.next_line().await? {
        if line.trim() == READY {
            return Ok(true);
        }
        debug!("Worker output: {}", line.trim());
    }
    Ok(false)
}

/// 起動失敗時の後始末
async fn reap(app_id: u32, mut child: Child) -> IdlerError {
    match timeout(STOP_GRACE, child.wait()).await {
        Ok(Ok(status)) => error_from_exit(app_id, status.code()),
        Ok(Err(e)) => IdlerError::FileIO(e),
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill worker for app {}: {}", app_id, e);
            }
            IdlerError::Worker {
                app_id,
                reason: "no ready signal and did not exit".into(),
            }
        }
    }
}

/// 子プロセスの標準出力をEOFまで読み続ける
///
/// 読まずに閉じると子プロセスの書き込みがEPIPEで失敗する
async fn drain_output(mut lines: OutputLines) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim() == READY => debug!("Worker is ready"),
            Ok(Some(line)) => debug!("Worker output: {}", line.trim()),
            Ok(None) => break,
            Err(e) => {
                debug!("Failed to read worker output: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(
        &self,
        badge: &Badge,
        events: UnboundedSender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerHandle>, IdlerError> {
        let app_id = badge.app_id;
        let mut child = self.command(app_id).spawn()?;
        debug!("Spawned worker pid={:?} for app {}", child.id(), app_id);

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| IdlerError::Worker {
                app_id,
                reason: "stdout not captured".into(),
            })?;

        // 初期化完了を待つ
        let mut lines = BufReader::new(stdout).lines();
        match timeout(self.startup_timeout, wait_ready(&mut lines)).await {
            Ok(Ok(true)) => {
                debug!("Worker for app {} is ready", app_id);
            }
            Ok(result) => {
                if let Err(e) = result {
                    debug!("Failed to read worker output: {}", e);
                }
                // 子プロセスが入力待ちで止まらないように閉じる
                drop(stdin);
                drop(lines);
                return Err(reap(app_id, child).await);
            }
            Err(_) => {
                // SteamAPI_Init が遅いだけなら動かし続ける
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(error_from_exit(app_id, status.code()));
                }
                warn!(
                    "Worker for app {} not ready after {:?}, keeping it",
                    app_id, self.startup_timeout
                );
            }
        }

        let running = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = oneshot::channel();
        let span = tracing::info_span!("worker", app_id, title = %badge.title);
        let task = tokio::spawn(
            watch(app_id, child, stdin, lines, stop_rx, events, running.clone()).instrument(span),
        );

        Ok(Box::new(ProcessWorker {
            app_id,
            running,
            stop_tx: Some(stop_tx),
            task: Some(task),
        }))
    }
}

/// 子プロセスを監視する
///
/// 停止指示の前に終了したら `WorkerEvent::Failed` を送る
async fn watch(
    app_id: u32,
    mut child: Child,
    stdin: Option<ChildStdin>,
    lines: OutputLines,
    stop_rx: oneshot::Receiver<()>,
    events: UnboundedSender<WorkerEvent>,
    running: Arc<AtomicBool>,
) {
    let output = tokio::spawn(drain_output(lines).in_current_span());

    tokio::select! {
        status = child.wait() => {
            running.store(false, Ordering::SeqCst);
            let reason = match status {
                Ok(status) => error_from_exit(app_id, status.code()).to_string(),
                Err(e) => e.to_string(),
            };
            warn!("Worker exited unexpectedly: {}", reason);
            let _ = events.send(WorkerEvent::Failed { app_id, reason });
        }
        _ = stop_rx => {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(format!("{}\n", STOP).as_bytes()).await {
                    debug!("Failed to send stop signal: {}", e);
                }
                // EOFでも止まる
                drop(stdin);
            }

            match timeout(STOP_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!("Worker stopped: {}", status),
                _ => {
                    debug!("Worker did not stop in time, killing");
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill worker: {}", e);
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        }
    }

    // 子プロセスが終われば標準出力もEOFになる
    if timeout(STOP_GRACE, output).await.is_err() {
        debug!("Worker output still open after exit");
    }
}

/// 起動中のワーカープロセス
pub struct ProcessWorker {
    app_id: u32,
    running: Arc<AtomicBool>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl WorkerHandle for ProcessWorker {
    fn app_id(&self) -> u32 {
        self.app_id
    }

    fn is_running(&mut self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn stop(&mut self) -> Result<(), IdlerError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            // 既に終了していれば受信側はない
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| IdlerError::Worker {
                app_id: self.app_id,
                reason: format!("watcher task: {}", e),
            })?;
        }
        info!("Worker for app {} stopped", self.app_id);
        Ok(())
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        // タスクを止めれば kill_on_drop で子プロセスも終わる
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launcher(program: &str) -> ProcessLauncher {
        let config = IdlerConfig::new("sess", "76561198000000001%7C%7Ctoken")
            .with_library_path("/tmp/libsteam_api.so");
        ProcessLauncher::new(&config).unwrap().with_program(program)
    }

    #[test]
    fn test_command_line() {
        let cmd = launcher("/usr/bin/badge-idler").with_debug(true).command(440);
        let cmd = cmd.as_std();
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();

        assert_eq!(cmd.get_program(), "/usr/bin/badge-idler");
        assert_eq!(
            args,
            vec!["worker", "440", "--library", "/tmp/libsteam_api.so", "--debug"]
        );

        let envs: Vec<(String, String)> = cmd
            .get_envs()
            .filter_map(|(k, v)| {
                Some((k.to_string_lossy().to_string(), v?.to_string_lossy().to_string()))
            })
            .collect();
        assert!(envs.contains(&("SteamAppId".to_string(), "440".to_string())));
        assert!(envs.contains(&("SteamGameId".to_string(), "440".to_string())));
    }

    /// 引数を無視してシェルスクリプトを実行するワーカー
    #[cfg(unix)]
    fn script(dir: &tempfile::TempDir, body: &str) -> ProcessLauncher {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("worker.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        launcher(path.to_str().unwrap())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_worker_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = script(&dir, "sleep 2\necho ready\nread x")
            .with_startup_timeout(Duration::from_secs(1));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let badge = Badge::new(440, "Team Fortress 2", "https://example.invalid/440", 1);

        let mut worker = launcher.launch(&badge, tx).await.unwrap();

        // 遅れて届いた ready を書けずに終わってはいけない
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
        assert!(worker.is_running());

        worker.stop().await.unwrap();
        assert!(!worker.is_running());
        assert!(rx.try_recv().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_before_ready_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = script(
            &dir,
            "echo 'Setting breakpad minidump AppID = 440'\necho ready\nread x",
        );
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let badge = Badge::new(440, "Team Fortress 2", "https://example.invalid/440", 1);

        let mut worker = timeout(Duration::from_secs(10), launcher.launch(&badge, tx))
            .await
            .expect("launch must not hang")
            .unwrap();
        assert!(worker.is_running());

        worker.stop().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_after_output_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = script(&dir, "echo 'loading steam_api'\nexit 3");
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let badge = Badge::new(440, "Team Fortress 2", "https://example.invalid/440", 1);

        let result = timeout(Duration::from_secs(10), launcher.launch(&badge, tx))
            .await
            .expect("launch must not hang");
        assert!(matches!(result, Err(IdlerError::SessionInit(440))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_failure_is_reported() {
        // `false` は即座に終了コード1で終わる
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let badge = Badge::new(440, "Team Fortress 2", "https://example.invalid/440", 1);

        let result = launcher("false").launch(&badge, tx).await;
        assert!(matches!(
            result,
            Err(IdlerError::Worker { app_id: 440, .. })
        ));
    }
}
