use std::rc::Rc;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use reqwest::blocking::Client;
use serde_json::Value;
use tracing::debug;

use crate::config::{env_override, env_value};
use crate::format::parse_views;
use crate::http::{RetryPolicy, Throttle, send_with_retry};
use crate::platform::Platform;
use crate::resolver::{ViewCountSource, ViewResolver};

// Bilibili rejects obvious scrapers, so every platform gets a browser UA.
const DEFAULT_SCRAPER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RETRIES: usize = 2;
const DEFAULT_RETRY_DELAY_MS: u64 = 350;
const DEFAULT_MIN_INTERVAL_MS: u64 = 100;

const BILIBILI_VIEW_API: &str = "https://api.bilibili.com/x/web-interface/view";
const YOUTUBE_WATCH_URL: &str = "https://www.youtube.com/watch";
const NICONICO_THUMBINFO_API: &str = "https://ext.nicovideo.jp/api/getthumbinfo";

static YOUTUBE_VIEWS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""simpleText":"([\d,]+) views""#).expect("youtube views regex")
});
static NICONICO_VIEWS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<view_counter>(\d+)</view_counter>").expect("niconico views regex")
});

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub retries: usize,
    pub retry_delay_ms: u64,
    pub min_interval_ms: u64,
}

impl ScraperConfig {
    pub fn from_env() -> Self {
        Self {
            user_agent: env_override("VIEWBOT_SCRAPER_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_SCRAPER_USER_AGENT.to_string()),
            timeout_ms: env_value("VIEWBOT_HTTP_TIMEOUT_MS", DEFAULT_TIMEOUT_MS),
            retries: env_value("VIEWBOT_HTTP_RETRIES", DEFAULT_RETRIES),
            retry_delay_ms: env_value("VIEWBOT_HTTP_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS),
            min_interval_ms: env_value("VIEWBOT_HTTP_MIN_INTERVAL_MS", DEFAULT_MIN_INTERVAL_MS),
        }
    }
}

/// One HTTP client shared by every platform source.
pub struct ScraperClient {
    client: Client,
    retry: RetryPolicy,
    interval: Duration,
    throttle: Throttle,
}

impl ScraperClient {
    pub fn new(config: ScraperConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent)
            .build()
            .context("failed to build scraper HTTP client")?;
        Ok(Self {
            client,
            retry: RetryPolicy {
                retries: config.retries,
                delay_ms: config.retry_delay_ms,
            },
            interval: Duration::from_millis(config.min_interval_ms),
            throttle: Throttle::default(),
        })
    }

    pub fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String> {
        let response = send_with_retry(self.retry, &self.throttle, self.interval, || {
            self.client.get(url).query(query)
        })
        .with_context(|| format!("failed to fetch {url}"))?;
        response
            .text()
            .with_context(|| format!("failed to read response body from {url}"))
    }

    pub fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value> {
        let body = self.get_text(url, query)?;
        serde_json::from_str(&body).with_context(|| format!("invalid JSON from {url}"))
    }
}

pub struct BilibiliViews {
    client: Rc<ScraperClient>,
}

impl ViewCountSource for BilibiliViews {
    fn platform(&self) -> Platform {
        Platform::Bilibili
    }

    fn fetch_view_count(&self, id: &str) -> Result<u64> {
        let payload = self.client.get_json(BILIBILI_VIEW_API, &[("bvid", id)])?;
        parse_bilibili_views(&payload)
    }
}

pub struct YouTubeViews {
    client: Rc<ScraperClient>,
}

impl ViewCountSource for YouTubeViews {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    fn fetch_view_count(&self, id: &str) -> Result<u64> {
        let page = self.client.get_text(YOUTUBE_WATCH_URL, &[("v", id)])?;
        Ok(parse_youtube_views(&page))
    }
}

pub struct NicoNicoViews {
    client: Rc<ScraperClient>,
}

impl ViewCountSource for NicoNicoViews {
    fn platform(&self) -> Platform {
        Platform::NicoNico
    }

    fn fetch_view_count(&self, id: &str) -> Result<u64> {
        let url = format!("{NICONICO_THUMBINFO_API}/{id}");
        let body = self.client.get_text(&url, &[])?;
        Ok(parse_niconico_views(&body))
    }
}

/// Resolver wired to the live Bilibili, YouTube and NicoNico endpoints.
pub fn live_resolver(config: ScraperConfig) -> Result<ViewResolver> {
    let client = Rc::new(ScraperClient::new(config)?);
    Ok(ViewResolver::new()
        .with_source(BilibiliViews {
            client: Rc::clone(&client),
        })
        .with_source(YouTubeViews {
            client: Rc::clone(&client),
        })
        .with_source(NicoNicoViews { client }))
}

pub fn parse_bilibili_views(payload: &Value) -> Result<u64> {
    if let Some(views) = payload
        .get("data")
        .and_then(|data| data.get("stat"))
        .and_then(|stat| stat.get("view"))
        .and_then(Value::as_u64)
    {
        return Ok(views);
    }
    let code = payload.get("code").and_then(Value::as_i64).unwrap_or(0);
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("missing data.stat.view");
    bail!("bilibili API error [{code}]: {message}")
}

/// Zero when the watch page carries no view counter.
pub fn parse_youtube_views(page: &str) -> u64 {
    let views = YOUTUBE_VIEWS_RE
        .captures(page)
        .and_then(|captures| parse_views(&captures[1]))
        .unwrap_or(0);
    debug!(views, "parsed youtube watch page");
    views
}

pub fn parse_niconico_views(body: &str) -> u64 {
    NICONICO_VIEWS_RE
        .captures(body)
        .and_then(|captures| captures[1].parse().ok())
        .unwrap_or(0)
}
