use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::types::{Badge, BadgePage};
use crate::error::IdlerError;

const USER_AVATAR: &str = "a.user_avatar";
const PAGE_LINK: &str = "a.pagelink";
const BADGE_ROW: &str = "div.badge_row";
const PROGRESS_INFO: &str = "span.progress_info_bold";
const BADGE_ROW_OVERLAY: &str = "a.badge_row_overlay";
const BADGE_TITLE: &str = "div.badge_title";

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));
static GAMECARDS_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"gamecards/(\d+)").expect("valid regex"));

fn selector(css: &str) -> Result<Selector, IdlerError> {
    Selector::parse(css).map_err(|e| IdlerError::Parse(format!("セレクタ {}: {:?}", css, e)))
}

fn first_number(text: &str) -> Option<u32> {
    NUMBER.find(text).and_then(|m| m.as_str().parse().ok())
}

fn app_id_from_url(url: &str) -> Option<u32> {
    GAMECARDS_ID
        .captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .or_else(|| NUMBER.find_iter(url).last().and_then(|m| m.as_str().parse().ok()))
}

/// 子要素（"View details" など）を除いたタイトル文字列
fn own_text(element: ElementRef<'_>) -> String {
    let text: String = element
        .children()
        .filter_map(|node| node.value().as_text().map(|t| String::from(&**t)))
        .collect();
    text.trim().to_string()
}

/// バッジ一覧ページ (`/badges/?p=N`) を解析
pub fn parse_badge_list(html: &str) -> Result<BadgePage, IdlerError> {
    let document = Html::parse_document(html);

    let authenticated = document.select(&selector(USER_AVATAR)?).next().is_some();

    let page_count = document
        .select(&selector(PAGE_LINK)?)
        .last()
        .and_then(|link| first_number(&link.text().collect::<String>()))
        .unwrap_or(1)
        .max(1);

    let progress = selector(PROGRESS_INFO)?;
    let overlay = selector(BADGE_ROW_OVERLAY)?;
    let badge_title = selector(BADGE_TITLE)?;

    let mut badges = Vec::new();
    for row in document.select(&selector(BADGE_ROW)?) {
        let Some(drops_left) = row
            .select(&progress)
            .next()
            .and_then(|span| first_number(&span.text().collect::<String>()))
        else {
            continue;
        };
        if drops_left == 0 {
            continue;
        }

        let Some(url) = row
            .select(&overlay)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            debug!("Badge row without overlay link, skipping");
            continue;
        };
        let Some(app_id) = app_id_from_url(url) else {
            debug!("No app id in badge url {}, skipping", url);
            continue;
        };
        let title = row.select(&badge_title).next().map(own_text).unwrap_or_default();

        badges.push(Badge::new(app_id, title, url, drops_left));
    }

    Ok(BadgePage {
        authenticated,
        page_count,
        badges,
    })
}

/// ゲームカードページの残りドロップ数
///
/// "No card drops remaining" のように数字がない場合は0
pub fn parse_drops_left(html: &str) -> Result<u32, IdlerError> {
    let document = Html::parse_document(html);
    let span = document
        .select(&selector(PROGRESS_INFO)?)
        .next()
        .ok_or_else(|| IdlerError::Parse(format!("{} が見つかりません", PROGRESS_INFO)))?;

    Ok(first_number(&span.text().collect::<String>()).unwrap_or(0))
}

pub fn badges_url(base_url: &str, steam_id: &str) -> String {
    format!("{}/profiles/{}/badges/", base_url.trim_end_matches('/'), steam_id)
}

pub fn page_url(badges_url: &str, page: u32) -> String {
    format!("{}?p={}", badges_url, page)
}

/// 相対URLをベースURLで補完
pub fn resolve_url(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            href.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BADGE_LIST: &str = r##"
    <html><body>
      <div class="user_avatar_wrapper"><a class="user_avatar playerAvatar" href="#"><img></a></div>
      <div class="badge_row is_link">
        <a class="badge_row_overlay" href="https://steamcommunity.com/profiles/76561198000000001/gamecards/440/"></a>
        <div class="badge_title">
          Team Fortress 2
          &nbsp;<span class="badge_view_details">View details</span>
        </div>
        <span class="progress_info_bold">3 card drops remaining</span>
      </div>
      <div class="badge_row is_link">
        <a class="badge_row_overlay" href="https://steamcommunity.com/profiles/76561198000000001/gamecards/570/"></a>
        <div class="badge_title">Dota 2</div>
        <span class="progress_info_bold">No card drops remaining</span>
      </div>
      <div class="badge_row is_link">
        <a class="badge_row_overlay" href="https://steamcommunity.com/profiles/76561198000000001/gamecards/730/"></a>
        <div class="badge_title">Counter-Strike 2</div>
        <span class="progress_info_bold">1 card drop remaining</span>
      </div>
      <div class="badge_row">
        <div class="badge_title">Community Ambassador</div>
      </div>
      <div class="pageLinks">
        <a class="pagelink" href="?p=1">1</a>
        <a class="pagelink" href="?p=2">2</a>
        <a class="pagelink" href="?p=3">3</a>
      </div>
    </body></html>
    "##;

    #[test]
    fn test_parse_badge_list() {
        let page = parse_badge_list(BADGE_LIST).unwrap();

        assert!(page.authenticated);
        assert_eq!(page.page_count, 3);
        assert_eq!(page.badges.len(), 2);
        assert_eq!(page.cards_left(), 4);

        let tf2 = &page.badges[0];
        assert_eq!(tf2.app_id, 440);
        assert_eq!(tf2.title, "Team Fortress 2");
        assert_eq!(tf2.drops_left, 3);
        assert!(tf2.url.ends_with("/gamecards/440/"));

        assert_eq!(page.badges[1].app_id, 730);
        assert_eq!(page.badges[1].drops_left, 1);
    }

    #[test]
    fn test_parse_logged_out_page() {
        let page = parse_badge_list("<html><body><a class=\"global_action_link\">Login</a></body></html>")
            .unwrap();
        assert!(!page.authenticated);
        assert_eq!(page.page_count, 1);
        assert!(page.badges.is_empty());
    }

    #[test]
    fn test_app_id_from_url() {
        assert_eq!(
            app_id_from_url("https://steamcommunity.com/profiles/76561198000000001/gamecards/440/"),
            Some(440)
        );
        assert_eq!(app_id_from_url("https://steamcommunity.com/id/someone/gamecards/570"), Some(570));
        assert_eq!(app_id_from_url("/app/218620"), Some(218620));
        assert_eq!(app_id_from_url("https://steamcommunity.com/id/someone/"), None);
    }

    #[test]
    fn test_parse_drops_left() {
        let html = r#"<div class="badge_title_stats_drops">
            <span class="progress_info_bold">2 card drops remaining</span></div>"#;
        assert_eq!(parse_drops_left(html).unwrap(), 2);

        let done = r#"<span class="progress_info_bold">No card drops remaining</span>"#;
        assert_eq!(parse_drops_left(done).unwrap(), 0);

        assert!(matches!(
            parse_drops_left("<html></html>"),
            Err(IdlerError::Parse(_))
        ));
    }

    #[test]
    fn test_urls() {
        let badges = badges_url("https://steamcommunity.com/", "76561198000000001");
        assert_eq!(badges, "https://steamcommunity.com/profiles/76561198000000001/badges/");
        assert_eq!(page_url(&badges, 2), format!("{}?p=2", badges));
        assert_eq!(
            resolve_url("https://steamcommunity.com", "/id/x/gamecards/440/"),
            "https://steamcommunity.com/id/x/gamecards/440/"
        );
        assert_eq!(resolve_url("https://a.example", "https://b.example/x"), "https://b.example/x");
    }
}
