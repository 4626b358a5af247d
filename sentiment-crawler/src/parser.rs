use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::sync::LazyLock;

use crate::types::{Comment, NewsItem, Post, RawElement};

/// Listing rows on the discussion board.
pub const POST_ROW_SELECTOR: &str = "table tbody tr";
/// Replies on a post page.
pub const COMMENT_SELECTOR: &str = ".article-item";
/// Result entries on the research report search page.
pub const REPORT_ITEM_SELECTOR: &str = ".yb_list li";

static NEWS_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<li\b[^>]*>(.*?)</li>").expect("valid news item pattern"));
static NEWS_ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<a\b[^>]*>(.*?)</a>").expect("valid anchor pattern"));
static NEWS_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2})").expect("valid date pattern"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));

pub struct PostParser {
    today: NaiveDate,
}

impl PostParser {
    /// `today` completes listing dates that omit the year.
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    /// All six fields must be present and parse; otherwise the row is dropped.
    pub fn parse(&self, row: &RawElement) -> Option<Post> {
        let title = row.read_field(".l3 a")?;
        let author = row.read_field(".l4 a")?;
        let post_date = parse_listing_date(&row.read_field(".l5")?, self.today)?;
        let post_time = row.read_field(".l6")?;
        let reply_count = parse_count(&row.read_field(".l7 span")?)?;
        let like_count = parse_count(&row.read_field(".l8 span")?)?;
        let post_id = row
            .read_attr(".l3 a", "href")
            .and_then(|href| post_id_from_link(&href));

        Some(Post {
            title,
            author,
            post_date,
            post_time,
            reply_count,
            like_count,
            post_id,
        })
    }
}

pub struct CommentParser;

impl CommentParser {
    /// `post_id` is left empty; the caller stamps the owning post.
    pub fn parse(item: &RawElement) -> Option<Comment> {
        Some(Comment {
            author: item.read_field(".user_name a")?,
            content: item.read_field(".t_content")?,
            comment_time: item.read_field(".pub_time")?,
            like_count: parse_count(&item.read_field(".zan b")?)?,
            post_id: String::new(),
        })
    }
}

/// A report search hit before its document is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportListing {
    pub title: String,
    pub link: String,
}

pub struct ReportParser;

impl ReportParser {
    pub fn parse(item: &RawElement) -> Option<ReportListing> {
        Some(ReportListing {
            title: item.read_field(".title")?,
            link: item.read_attr("a", "href")?,
        })
    }
}

pub struct NewsParser;

impl NewsParser {
    /// Scan a raw search result page for `<li>` items carrying both an
    /// anchor title and a `YYYY-MM-DD` date. Items missing either are
    /// skipped and counted.
    pub fn parse_list(body: &str) -> NewsList {
        let mut list = NewsList::default();
        for capture in NEWS_ITEM.captures_iter(body) {
            let inner = &capture[1];
            match (news_title(inner), news_date(inner)) {
                (Some(title), Some(date)) => list.items.push(NewsItem { title, date }),
                _ => list.skipped += 1,
            }
        }
        list
    }
}

#[derive(Debug, Default)]
pub struct NewsList {
    pub items: Vec<NewsItem>,
    pub skipped: usize,
}

fn news_title(item: &str) -> Option<String> {
    let anchor = NEWS_ANCHOR.captures(item)?;
    let text = TAG.replace_all(&anchor[1], "");
    let title = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

fn news_date(item: &str) -> Option<NaiveDate> {
    let found = NEWS_DATE.captures(item)?;
    NaiveDate::parse_from_str(&found[1], "%Y-%m-%d").ok()
}

/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD` and `MM-DD`. A trailing time of day
/// is ignored. `MM-DD` takes the year of `today`, or the year before when
/// that would put the date in the future.
pub fn parse_listing_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let token = text.split_whitespace().next()?;
    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(token, format) {
            return Some(date);
        }
    }
    let (month, day) = token.split_once('-')?;
    let (month, day) = (month.parse().ok()?, day.parse().ok()?);
    match NaiveDate::from_ymd_opt(today.year(), month, day) {
        Some(date) if date <= today => Some(date),
        // 02-29 may exist this year but not the last.
        _ => NaiveDate::from_ymd_opt(today.year() - 1, month, day),
    }
}

/// Plain integers, thousands separators, and the `万` (x10,000) suffix.
pub fn parse_count(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some(tens_of_thousands) = text.strip_suffix('万') {
        let value: f64 = tens_of_thousands.trim().parse().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        return Some((value * 10_000.0).round() as u64);
    }
    text.replace(',', "").parse().ok()
}

/// Site id from a post link such as `/news,600036,1422637531.html`.
pub fn post_id_from_link(href: &str) -> Option<String> {
    let file = href.rsplit('/').next()?;
    let stem = file.split(['?', '#']).next()?.strip_suffix(".html")?;
    let id = stem.rsplit(',').next()?;
    (!id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())).then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn post_row(date: &str, replies: &str) -> RawElement {
        RawElement::new(format!(
            r#"<tr>
                <td class="l1"><span>1</span></td>
                <td class="l3"><a href="/news,600036,1422637531.html">招行一季报超预期</a></td>
                <td class="l4"><a href="/user/1">股友abc</a></td>
                <td class="l5">{date}</td>
                <td class="l6">09:31</td>
                <td class="l7"><span>{replies}</span></td>
                <td class="l8"><span>12</span></td>
            </tr>"#
        ))
    }

    #[test]
    fn parses_complete_post_row() {
        let post = PostParser::new(day(2024, 3, 1)).parse(&post_row("01-10", "1.2万")).unwrap();
        assert_eq!(post.title, "招行一季报超预期");
        assert_eq!(post.author, "股友abc");
        assert_eq!(post.post_date, day(2024, 1, 10));
        assert_eq!(post.post_time, "09:31");
        assert_eq!(post.reply_count, 12_000);
        assert_eq!(post.like_count, 12);
        assert_eq!(post.post_id.as_deref(), Some("1422637531"));
    }

    #[test]
    fn drops_rows_with_unparseable_fields() {
        let parser = PostParser::new(day(2024, 3, 1));
        assert!(parser.parse(&post_row("yesterday", "3")).is_none());
        assert!(parser.parse(&post_row("01-10", "n/a")).is_none());
        assert!(parser
            .parse(&RawElement::new("<tr><th>标题</th><th>作者</th></tr>"))
            .is_none());
    }

    #[test]
    fn listing_dates() {
        let today = day(2024, 3, 1);
        assert_eq!(parse_listing_date("2023-12-31", today), Some(day(2023, 12, 31)));
        assert_eq!(parse_listing_date("2023/12/31 10:00", today), Some(day(2023, 12, 31)));
        assert_eq!(parse_listing_date("02-29", today), Some(day(2024, 2, 29)));
        assert_eq!(parse_listing_date("02-30", today), None);
    }

    #[test]
    fn short_dates_never_land_in_the_future() {
        let today = day(2025, 1, 2);
        assert_eq!(parse_listing_date("01-02", today), Some(day(2025, 1, 2)));
        assert_eq!(parse_listing_date("12-31 23:59", today), Some(day(2024, 12, 31)));

        let post = PostParser::new(today).parse(&post_row("12-31", "3")).unwrap();
        assert_eq!(post.post_date, day(2024, 12, 31));

        // No 02-29 in 2025, so a leap day seen in 2025 before March is 2024's.
        assert_eq!(parse_listing_date("02-29", day(2025, 2, 1)), Some(day(2024, 2, 29)));
    }

    #[test]
    fn counts() {
        assert_eq!(parse_count("1,024"), Some(1024));
        assert_eq!(parse_count(" 3万 "), Some(30_000));
        assert_eq!(parse_count("-1"), None);
        assert_eq!(parse_count(""), None);
    }

    #[test]
    fn post_ids_come_from_links() {
        assert_eq!(post_id_from_link("//guba.eastmoney.com/news,000858,99.html?from=list").as_deref(), Some("99"));
        assert_eq!(post_id_from_link("/news,600036,abc.html"), None);
        assert_eq!(post_id_from_link("/user/1"), None);
    }

    #[test]
    fn parses_comment_item() {
        let item = RawElement::new(
            r#"<div class="article-item">
                <div class="user_name"><a>老股民</a></div>
                <div class="t_content">继续持有</div>
                <span class="pub_time">2024-01-10 10:12</span>
                <span class="zan"><b>7</b></span>
            </div>"#,
        );
        let comment = CommentParser::parse(&item).unwrap();
        assert_eq!(comment.author, "老股民");
        assert_eq!(comment.content, "继续持有");
        assert_eq!(comment.comment_time, "2024-01-10 10:12");
        assert_eq!(comment.like_count, 7);
        assert!(comment.post_id.is_empty());
    }

    #[test]
    fn parses_report_listing() {
        let item = RawElement::new(
            r#"<li><a href="https://pdf.example.com/a.pdf"><span class="title">年报点评</span></a></li>"#,
        );
        assert_eq!(
            ReportParser::parse(&item),
            Some(ReportListing {
                title: "年报点评".to_string(),
                link: "https://pdf.example.com/a.pdf".to_string()
            })
        );
        assert!(ReportParser::parse(&RawElement::new("<li><span class=\"title\">x</span></li>")).is_none());
    }

    #[test]
    fn news_list_skips_incomplete_items() {
        let body = r#"
            <ul>
              <li><a href="/n/1"><em>招商银行</em>发布年报</a><span>2024-03-25 18:00</span></li>
              <li><a href="/n/2">没有日期的条目</a></li>
              <li><span>2024-03-20</span></li>
              <li class="x"><a href="/n/3">利率下行</a> 2024-03-19</li>
            </ul>"#;
        let list = NewsParser::parse_list(body);
        assert_eq!(list.skipped, 2);
        let items = list.items;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "招商银行发布年报");
        assert_eq!(items[0].date, NaiveDate::from_ymd_opt(2024, 3, 25).unwrap());
        assert_eq!(items[1].title, "利率下行");
    }
}
