//! バッジ関連の型定義

use serde::{Deserialize, Serialize};

/// カードドロップが残っているゲーム
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    /// SteamのアプリID (SteamAppId)
    pub app_id: u32,
    /// ゲームタイトル
    pub title: String,
    /// バッジ詳細ページのURL (gamecards)
    pub url: String,
    /// 残りドロップ数
    pub drops_left: u32,
}

impl Badge {
    pub fn new(app_id: u32, title: impl Into<String>, url: impl Into<String>, drops_left: u32) -> Self {
        Self {
            app_id,
            title: title.into(),
            url: url.into(),
            drops_left,
        }
    }
}

/// バッジ一覧ページ1枚分の解析結果
#[derive(Debug, Clone, Default)]
pub struct BadgePage {
    /// ログイン状態か (a.user_avatar の有無)
    pub authenticated: bool,
    /// ページ数 (ページャがなければ1)
    pub page_count: u32,
    /// ドロップが残っているバッジ
    pub badges: Vec<Badge>,
}

impl BadgePage {
    pub fn cards_left(&self) -> u32 {
        total_cards(&self.badges)
    }
}

pub fn total_cards(badges: &[Badge]) -> u32 {
    badges.iter().map(|b| b.drops_left).sum()
}
