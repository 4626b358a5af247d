use anyhow::Result;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;

/// Header identity and optional proxy a rendering context is launched with.
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    pub user_agent: String,
    pub proxy: Option<String>,
}

/// Outcome of waiting for a listing's ready selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
}

/// One element pulled out of a rendered page, kept as its outer HTML.
///
/// Field reads never fail loudly: an invalid selector, a missing node or a
/// blank text all come back as `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawElement {
    html: String,
}

impl RawElement {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    /// Trimmed text of the first node matching `selector`.
    pub fn read_field(&self, selector: &str) -> Option<String> {
        self.with_first(selector, |el| {
            let text = el.text().collect::<String>();
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            (!text.is_empty()).then_some(text)
        })
    }

    /// Attribute `attr` of the first node matching `selector`.
    pub fn read_attr(&self, selector: &str, attr: &str) -> Option<String> {
        self.with_first(selector, |el| {
            el.value()
                .attr(attr)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
    }

    fn with_first<T>(&self, selector: &str, read: impl Fn(ElementRef<'_>) -> Option<T>) -> Option<T> {
        let selector = match Selector::parse(selector) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(selector, error = %e, "Invalid field selector");
                return None;
            }
        };
        let fragment = Html::parse_fragment(&self.fragment_source());
        let first = fragment.select(&selector).next()?;
        read(first)
    }

    // Table parts are dropped by the HTML parser unless they sit inside a table.
    fn fragment_source(&self) -> String {
        let head = self.html.trim_start().get(..3).unwrap_or_default().to_ascii_lowercase();
        match head.as_str() {
            "<tr" => format!("<table><tbody>{}</tbody></table>", self.html),
            "<td" | "<th" => format!("<table><tbody><tr>{}</tr></tbody></table>", self.html),
            _ => self.html.clone(),
        }
    }
}

/// Factory for rendering contexts. Each `open` yields an independent session
/// that is exclusively owned by its caller.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn open(&self, identity: &SessionIdentity) -> Result<Box<dyn RenderSession>>;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait RenderSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    async fn await_ready(&mut self, selector: &str, timeout: Duration) -> Result<Readiness>;

    async fn extract_all(&mut self, selector: &str) -> Result<Vec<RawElement>>;

    /// Release the underlying rendering resource. Called once by the owner.
    async fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fields_from_table_row() {
        let row = RawElement::new(
            r#"<tr><td class="l3"><a href="/news,600036,1422.html"> 利好 </a></td><td class="l5">01-10</td></tr>"#,
        );
        assert_eq!(row.read_field(".l3 a").as_deref(), Some("利好"));
        assert_eq!(row.read_attr(".l3 a", "href").as_deref(), Some("/news,600036,1422.html"));
        assert_eq!(row.read_field(".l5").as_deref(), Some("01-10"));
    }

    #[test]
    fn missing_or_blank_fields_are_none() {
        let item = RawElement::new(r#"<li><span class="title">   </span></li>"#);
        assert_eq!(item.read_field(".title"), None);
        assert_eq!(item.read_field(".author"), None);
        assert_eq!(item.read_attr("a", "href"), None);
        assert_eq!(item.read_field("::not a selector"), None);
    }
}
