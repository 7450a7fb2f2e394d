//! 放置ワーカーの監視
//!
//! 同時に動かすワーカー数を `max_concurrent` 以下に保ちながら、
//! ラウンドごとに残りドロップ数を確認して再起動・終了を決める。
//! ワーカーの異常終了はチャンネル経由で届き、実行全体を中断する

mod state;

pub use state::{decide, RoundDecision, TitleState, TitleStatus};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::badges::total_cards;
use crate::config::IdleConfig;
use crate::error::IdlerError;
use crate::traits::{BadgeSource, WorkerHandle, WorkerLauncher};
use crate::worker::WorkerEvent;

/// 実行結果
#[derive(Debug, Clone)]
pub struct IdleSummary {
    pub titles: usize,
    pub cards_at_start: u32,
    pub rounds: u32,
    pub restarts: u32,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl fmt::Display for IdleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = self.finished_at - self.started_at;
        write!(
            f,
            "{} games, {} cards, {} rounds, {} restarts in {}h{:02}m",
            self.titles,
            self.cards_at_start,
            self.rounds,
            self.restarts,
            elapsed.num_hours(),
            elapsed.num_minutes() % 60
        )
    }
}

pub struct Supervisor {
    source: Arc<dyn BadgeSource>,
    launcher: Arc<dyn WorkerLauncher>,
    config: IdleConfig,
    titles: Vec<TitleState>,
    workers: HashMap<u32, Box<dyn WorkerHandle>>,
    events_tx: UnboundedSender<WorkerEvent>,
    events_rx: UnboundedReceiver<WorkerEvent>,
    rounds: u32,
    restarts: u32,
}

impl Supervisor {
    pub fn new(
        source: Arc<dyn BadgeSource>,
        launcher: Arc<dyn WorkerLauncher>,
        config: IdleConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            source,
            launcher,
            config,
            titles: Vec::new(),
            workers: HashMap::new(),
            events_tx,
            events_rx,
            rounds: 0,
            restarts: 0,
        }
    }

    pub fn titles(&self) -> &[TitleState] {
        &self.titles
    }

    /// 稼働中のワーカー数
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    fn idling_count(&self) -> usize {
        self.titles.iter().filter(|t| t.is_idling()).count()
    }

    /// 全ゲームのドロップを取り切るまで放置する
    ///
    /// 戻る前に必ず全ワーカーを停止する
    pub async fn run(&mut self) -> Result<IdleSummary, IdlerError> {
        let started_at = Local::now();

        let badges = self.source.overview().await?;
        let cards_at_start = total_cards(&badges);
        self.titles = badges.into_iter().map(TitleState::new).collect();

        if self.titles.is_empty() {
            info!("No games with card drops left");
        } else {
            let result = self.idle_all().await;
            self.shutdown().await;
            result?;
        }

        Ok(IdleSummary {
            titles: self.titles.len(),
            cards_at_start,
            rounds: self.rounds,
            restarts: self.restarts,
            started_at,
            finished_at: Local::now(),
        })
    }

    async fn idle_all(&mut self) -> Result<(), IdlerError> {
        let max_concurrent = self.config.max_concurrent();

        for index in 0..self.titles.len() {
            self.check_events()?;
            while self.idling_count() >= max_concurrent {
                self.idle_round().await?;
            }
            self.start(index).await?;
        }

        while self.idling_count() > 0 {
            self.idle_round().await?;
        }
        Ok(())
    }

    /// 届いているワーカーエラーを確認
    fn check_events(&mut self) -> Result<(), IdlerError> {
        match self.events_rx.try_recv() {
            Ok(event) => Err(event.into_error()),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(()),
        }
    }

    async fn start(&mut self, index: usize) -> Result<(), IdlerError> {
        let title = &self.titles[index];
        info!(
            "Starting idle game «{}» to get {} cards",
            title.badge.title, title.drops_left
        );
        self.launch(index).await?;

        let title = &mut self.titles[index];
        title.status = TitleStatus::Idling;
        title.started_at = Some(Local::now());
        Ok(())
    }

    async fn launch(&mut self, index: usize) -> Result<(), IdlerError> {
        let badge = self.titles[index].badge.clone();
        let handle = self.launcher.launch(&badge, self.events_tx.clone()).await?;
        self.workers.insert(badge.app_id, handle);
        Ok(())
    }

    async fn stop_worker(&mut self, app_id: u32) -> Result<(), IdlerError> {
        if let Some(mut worker) = self.workers.remove(&app_id) {
            worker.stop().await?;
        }
        Ok(())
    }

    /// 1ラウンド: 放置 → (停止) → 残りドロップ確認 → 再起動/終了
    async fn idle_round(&mut self) -> Result<(), IdlerError> {
        self.rounds += 1;
        let idle_time = self.config.idle_time();
        let secs = idle_time.as_secs();
        debug!("Idle {:02}:{:02} min.", secs / 60, secs % 60);

        tokio::select! {
            _ = sleep(idle_time) => {}
            Some(event) = self.events_rx.recv() => return Err(event.into_error()),
        }

        let restart_unchanged = self.config.restart_unchanged;
        let idling: Vec<usize> = (0..self.titles.len())
            .filter(|&i| self.titles[i].is_idling())
            .collect();

        // ゲームを閉じたときにドロップが付く
        if restart_unchanged {
            for &index in &idling {
                self.stop_worker(self.titles[index].app_id()).await?;
            }
            sleep(self.config.settle()).await;
        }

        for index in idling {
            self.review(index, restart_unchanged).await?;
        }
        self.check_events()
    }

    async fn review(&mut self, index: usize, restart_unchanged: bool) -> Result<(), IdlerError> {
        let badge = self.titles[index].badge.clone();
        let previous = self.titles[index].drops_left;

        let current = match self.source.drops_left(&badge).await {
            Ok(n) => Some(n),
            Err(e) if !e.is_fatal() => {
                warn!("Failed to check cards for «{}», retrying next round: {}", badge.title, e);
                None
            }
            Err(e) => return Err(e),
        };

        match decide(previous, current, restart_unchanged) {
            RoundDecision::Retire => {
                self.stop_worker(badge.app_id).await?;
                let title = &mut self.titles[index];
                title.drops_left = 0;
                title.status = TitleStatus::Retired;
                info!("Stopping idle game «{}»", badge.title);
            }
            RoundDecision::Restart => {
                if self.workers.contains_key(&badge.app_id) {
                    self.stop_worker(badge.app_id).await?;
                    sleep(self.config.settle()).await;
                }
                if let Some(n) = current.filter(|&n| n != previous) {
                    self.titles[index].drops_left = n;
                    info!("Continuing idle game «{}» to get {} cards", badge.title, n);
                }
                self.launch(index).await?;
                self.titles[index].restarts += 1;
                self.restarts += 1;
            }
            RoundDecision::Keep => {
                let alive = self
                    .workers
                    .get_mut(&badge.app_id)
                    .map(|w| w.is_running())
                    .unwrap_or(false);
                if !alive {
                    debug!("Worker for «{}» is gone, relaunching", badge.title);
                    self.workers.remove(&badge.app_id);
                    self.launch(index).await?;
                    self.titles[index].restarts += 1;
                    self.restarts += 1;
                }
            }
        }
        Ok(())
    }

    /// 全ワーカーを停止
    pub async fn shutdown(&mut self) {
        let app_ids: Vec<u32> = self.workers.keys().copied().collect();
        if !app_ids.is_empty() {
            info!("Stopping {} worker(s)", app_ids.len());
        }
        for app_id in app_ids {
            if let Err(e) = self.stop_worker(app_id).await {
                warn!("Failed to stop worker for app {}: {}", app_id, e);
            }
        }
    }
}
