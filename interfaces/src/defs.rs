use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A tracked financial instrument. Identity is the code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub code: String,
    pub name: String,
}

impl Instrument {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub title: String,
    pub author: String,
    pub post_date: NaiveDate,
    pub post_time: String,
    pub reply_count: u64,
    pub like_count: u64,
    /// Site-side post id taken from the title link, when the listing exposes one.
    #[serde(default)]
    pub post_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub content: String,
    pub comment_time: String,
    pub like_count: u64,
    /// Back-reference to the owning post. Stamped by the comment stage.
    pub post_id: String,
}

/// Research report metadata. The PDF itself lives in artifact storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMeta {
    pub title: String,
    pub source_url: String,
    pub downloaded_at: DateTime<Utc>,
    pub artifact_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Post,
    Comment,
    Report,
    News,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Post => "post",
            RecordKind::Comment => "comment",
            RecordKind::Report => "report",
            RecordKind::News => "news",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Post(Post),
    Comment(Comment),
    Report(ReportMeta),
    News(NewsItem),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Post(_) => RecordKind::Post,
            Record::Comment(_) => RecordKind::Comment,
            Record::Report(_) => RecordKind::Report,
            Record::News(_) => RecordKind::News,
        }
    }

    /// The record body as a flat JSON object, without the kind tag.
    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Record::Post(p) => serde_json::to_value(p),
            Record::Comment(c) => serde_json::to_value(c),
            Record::Report(r) => serde_json::to_value(r),
            Record::News(n) => serde_json::to_value(n),
        }
    }

    pub fn from_payload(kind: RecordKind, payload: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match kind {
            RecordKind::Post => Record::Post(serde_json::from_value(payload)?),
            RecordKind::Comment => Record::Comment(serde_json::from_value(payload)?),
            RecordKind::Report => Record::Report(serde_json::from_value(payload)?),
            RecordKind::News => Record::News(serde_json::from_value(payload)?),
        })
    }
}

/// Date bound derived by post discovery and consumed once by the comment stage.
///
/// The bounds are the first and last dates seen in listing order, not a sorted
/// min/max, so `start` may be later than `end` on a listing that is not
/// chronological.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Both bounds, or `None` when either is absent.
    pub fn bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((self.start?, self.end?))
    }

    /// Fold one more observed date into the window.
    pub fn observe(&mut self, date: NaiveDate) {
        if self.start.is_none() {
            self.start = Some(date);
        }
        self.end = Some(date);
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string());
        write!(f, "{} ~ {}", show(self.start), show(self.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn window_keeps_encounter_order() {
        let mut window = DateWindow::default();
        assert_eq!(window.bounds(), None);

        window.observe(d("2024-01-05"));
        window.observe(d("2024-01-09"));
        window.observe(d("2024-01-02"));
        assert_eq!(window.bounds(), Some((d("2024-01-05"), d("2024-01-02"))));
    }

    #[test]
    fn half_open_window_has_no_bounds() {
        let window = DateWindow {
            start: Some(d("2024-01-01")),
            end: None,
        };
        assert_eq!(window.bounds(), None);
    }

    #[test]
    fn payload_roundtrip_keeps_kind() {
        let record = Record::News(NewsItem {
            title: "招商银行发布年报".to_string(),
            date: d("2024-03-01"),
        });
        let payload = record.payload().unwrap();
        assert_eq!(payload["date"], "2024-03-01");
        let back = Record::from_payload(RecordKind::News, payload).unwrap();
        assert_eq!(back, record);
    }
}
