//! Financial and crypto news
//!
//! Headlines come from the CryptoCompare news API first, then from the
//! CoinDesk search page.

use super::{http::fetch_json, Capability};
use crate::Result;
use chrono::DateTime;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{debug, warn};

const CRYPTOCOMPARE_NEWS_URL: &str = "https://min-api.cryptocompare.com/data/v2/news/";
const COINDESK_SEARCH_URL: &str = "https://www.coindesk.com/search";

const PER_SOURCE_LIMIT: usize = 5;
const MAX_ITEMS: usize = 10;

const DESCRIPTION: &str = "Collects recent financial and crypto news headlines.
Input: a search query, e.g. \"bitcoin\", \"macro economy\", \"fed rate\".
Output: recent headlines with source, date and link.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsItem {
    pub title: String,
    pub url: String,
    pub date: String,
    pub source: String,
}

pub struct NewsCapability {
    client: Client,
}

impl NewsCapability {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn cryptocompare(&self, query: &str) -> Result<Vec<NewsItem>> {
        let mut request = self.client.get(CRYPTOCOMPARE_NEWS_URL).query(&[("lang", "EN")]);
        if mentions_bitcoin(query) {
            request = request.query(&[("categories", "BTC,ETH")]);
        }

        let body = fetch_json(request).await?;
        Ok(body.map(|b| parse_cryptocompare(&b)).unwrap_or_default())
    }

    async fn coindesk(&self, query: &str) -> Result<Vec<NewsItem>> {
        let response = self
            .client
            .get(COINDESK_SEARCH_URL)
            .query(&[("s", query)])
            .send()
            .await?;

        if !response.status().is_success() {
            debug!(status = %response.status(), "CoinDesk search unavailable");
            return Ok(Vec::new());
        }

        let html = response.text().await?;
        Ok(extract_articles(&html))
    }
}

#[async_trait::async_trait]
impl Capability for NewsCapability {
    fn name(&self) -> &str {
        "news"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    async fn execute(&self, input: &str) -> Result<String> {
        let query = input.trim();
        if query.is_empty() {
            return Ok("Format: a search query, e.g. \"bitcoin\"".to_string());
        }

        let (api, scraped) = tokio::join!(self.cryptocompare(query), self.coindesk(query));

        let mut items = Vec::new();
        for (source, result) in [("cryptocompare", api), ("coindesk", scraped)] {
            match result {
                Ok(found) => items.extend(found),
                Err(e) => warn!(source, error = %e, "News source failed"),
            }
        }

        Ok(format_news(query, &items))
    }
}

fn mentions_bitcoin(query: &str) -> bool {
    let query = query.to_lowercase();
    query.contains("bitcoin") || query.contains("btc")
}

fn parse_cryptocompare(body: &Value) -> Vec<NewsItem> {
    let Some(data) = body["Data"].as_array() else {
        return Vec::new();
    };

    data.iter()
        .take(PER_SOURCE_LIMIT)
        .filter_map(|item| {
            let title = item["title"].as_str()?.trim();
            if title.is_empty() {
                return None;
            }
            let date = item["published_on"]
                .as_i64()
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();

            Some(NewsItem {
                title: title.to_string(),
                url: item["url"].as_str().unwrap_or_default().to_string(),
                date,
                source: item["source"].as_str().unwrap_or("CryptoCompare").to_string(),
            })
        })
        .collect()
}

static ARTICLE_RE: OnceLock<Regex> = OnceLock::new();
static HREF_RE: OnceLock<Regex> = OnceLock::new();
static TIME_RE: OnceLock<Regex> = OnceLock::new();

fn article_re() -> &'static Regex {
    ARTICLE_RE.get_or_init(|| {
        Regex::new(r"(?is)<article\b.*?(?:</article>|\z)").expect("article pattern is valid")
    })
}

fn href_re() -> &'static Regex {
    HREF_RE.get_or_init(|| Regex::new(r#"(?i)href\s*=\s*"([^"]*)""#).expect("href pattern is valid"))
}

fn time_re() -> &'static Regex {
    TIME_RE.get_or_init(|| Regex::new(r"(?is)<time\b[^>]*>(.*?)</time>").expect("time pattern is valid"))
}

/// Pull headlines out of the `<article>` blocks of a search result page.
fn extract_articles(html: &str) -> Vec<NewsItem> {
    article_re()
        .find_iter(html)
        .filter_map(|m| {
            let block = m.as_str();
            let text = html2text::from_read(block.as_bytes(), 200).ok()?;
            let title = text.lines().map(clean_line).find(|l| !l.is_empty())?;

            Some(NewsItem {
                title,
                url: first_href(block)
                    .map(|href| absolute_coindesk_url(&href))
                    .unwrap_or_default(),
                date: time_text(block).unwrap_or_default(),
                source: "CoinDesk".to_string(),
            })
        })
        .take(PER_SOURCE_LIMIT)
        .collect()
}

/// Drop the markdown decoration html2text adds around headings and links.
fn clean_line(line: &str) -> String {
    let line = line.trim_start_matches(|c: char| c == '#' || c == '[' || c == '*' || c.is_whitespace());
    let line = match line.find("][") {
        Some(i) => &line[..i],
        None => line,
    };
    line.trim_end_matches(|c: char| c == ']' || c == '*' || c.is_whitespace())
        .to_string()
}

fn first_href(block: &str) -> Option<String> {
    href_re()
        .captures(block)
        .map(|caps| caps[1].to_string())
}

fn time_text(block: &str) -> Option<String> {
    let caps = time_re().captures(block)?;
    let text = caps[1].trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn absolute_coindesk_url(href: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else {
        format!("https://www.coindesk.com{}", href)
    }
}

fn format_news(query: &str, items: &[NewsItem]) -> String {
    if items.is_empty() {
        return format!("No news found for: {}", query);
    }

    let mut out = format!("News found for '{}':\n\n", query);
    for (i, item) in items.iter().take(MAX_ITEMS).enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, item.title));
        out.push_str(&format!("   Source: {}\n", item.source));
        if !item.date.is_empty() {
            out.push_str(&format!("   Date: {}\n", item.date));
        }
        if !item.url.is_empty() {
            out.push_str(&format!("   URL: {}\n", item.url));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_cryptocompare() {
        let body = json!({
            "Data": [
                { "title": "Bitcoin tops $70k", "url": "https://x/1", "published_on": 1704067200, "source": "coindesk" },
                { "title": "", "url": "https://x/2" },
                { "title": "ETH ETF flows", "url": "https://x/3" }
            ]
        });

        let items = parse_cryptocompare(&body);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].date, "2024-01-01 00:00");
        assert_eq!(items[0].source, "coindesk");
        assert_eq!(items[1].source, "CryptoCompare");
        assert!(parse_cryptocompare(&json!({ "Message": "rate limit" })).is_empty());
    }

    #[test]
    fn test_extract_articles() {
        let html = r#"<html><body>
            <article><h3><a href="/markets/2024/01/01/btc-rallies/">BTC rallies after CPI</a></h3>
              <time>Jan 1, 2024</time></article>
            <article><div></div></article>
            <article><h2>Funding turns negative</h2></article>
        </body></html>"#;

        let items = extract_articles(html);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "BTC rallies after CPI");
        assert_eq!(items[0].url, "https://www.coindesk.com/markets/2024/01/01/btc-rallies/");
        assert_eq!(items[0].date, "Jan 1, 2024");
        assert_eq!(items[1].title, "Funding turns negative");
    }

    #[test]
    fn test_extract_articles_tolerates_attributes_and_unclosed_block() {
        let html = r#"<article class="card" data-id="7">
              <a class="link" HREF = "https://www.coindesk.com/policy/sec/">SEC delays ETF decision</a>
              <time datetime="2024-02-01">Feb 1, 2024</time>
            </article>
            <article><p>Open interest hits record"#;

        let items = extract_articles(html);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://www.coindesk.com/policy/sec/");
        assert_eq!(items[0].date, "Feb 1, 2024");
        assert_eq!(items[1].title, "Open interest hits record");
        assert!(items[1].url.is_empty());
        assert!(items[1].date.is_empty());
    }

    #[test]
    fn test_extract_articles_caps_per_source() {
        let html = "<article><h3>Headline</h3></article>".repeat(PER_SOURCE_LIMIT + 3);
        assert_eq!(extract_articles(&html).len(), PER_SOURCE_LIMIT);
    }

    #[test]
    fn test_clean_line() {
        assert_eq!(clean_line("### [Fed holds rates][3]"), "Fed holds rates");
        assert_eq!(clean_line("  **Breaking** "), "Breaking");
    }

    #[test]
    fn test_format_news() {
        assert_eq!(format_news("fed", &[]), "No news found for: fed");

        let items = vec![NewsItem {
            title: "Fed holds".to_string(),
            url: String::new(),
            date: "2024-01-31".to_string(),
            source: "Reuters".to_string(),
        }];
        let text = format_news("fed", &items);
        assert!(text.starts_with("News found for 'fed':"));
        assert!(text.contains("1. Fed holds\n   Source: Reuters\n   Date: 2024-01-31\n"));
        assert!(!text.contains("URL:"));
    }

    #[test]
    fn test_bitcoin_queries_use_category_filter() {
        assert!(mentions_bitcoin("BTC funding"));
        assert!(!mentions_bitcoin("fed rate"));
    }
}
