//! タイトルごとの放置状態

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::badges::Badge;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TitleStatus {
    /// 空きワーカー待ち
    Queued,
    /// ワーカー稼働中（ラウンド間で一時停止していることもある）
    Idling,
    /// ドロップを取り切った
    Retired,
}

#[derive(Debug, Clone, Serialize)]
pub struct TitleState {
    pub badge: Badge,
    pub drops_left: u32,
    pub status: TitleStatus,
    pub started_at: Option<DateTime<Local>>,
    pub restarts: u32,
}

impl TitleState {
    pub fn new(badge: Badge) -> Self {
        Self {
            drops_left: badge.drops_left,
            badge,
            status: TitleStatus::Queued,
            started_at: None,
            restarts: 0,
        }
    }

    pub fn app_id(&self) -> u32 {
        self.badge.app_id
    }

    pub fn is_idling(&self) -> bool {
        self.status == TitleStatus::Idling
    }
}

/// ラウンド終了時の判断
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundDecision {
    /// ワーカーをそのまま動かす
    Keep,
    /// 停止して起動し直す
    Restart,
    /// 停止して二度と起動しない
    Retire,
}

/// 再スクレイプ結果からワーカーの扱いを決める
///
/// `current` が `None` のときはスクレイプ失敗で、前回の値のまま続ける
pub fn decide(previous: u32, current: Option<u32>, restart_unchanged: bool) -> RoundDecision {
    match current {
        Some(0) => RoundDecision::Retire,
        Some(n) if n != previous => RoundDecision::Restart,
        _ if restart_unchanged => RoundDecision::Restart,
        _ => RoundDecision::Keep,
    }
}
