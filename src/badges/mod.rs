//! バッジページ解析モジュール
//!
//! Steamのバッジ一覧ページ / ゲームカードページから残りドロップ数を取り出す

mod parser;
mod types;

pub use parser::{badges_url, page_url, parse_badge_list, parse_drops_left, resolve_url};
pub use types::{total_cards, Badge, BadgePage};
