use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{ViewbotConfig, env_value};
use crate::http::{RetryPolicy, Throttle, send_with_retry};

pub const NS_MAIN: i32 = 0;
/// Titles per `prop=revisions` request; the API's limit for non-bot reads.
pub const PAGE_BATCH_SIZE: usize = 50;

const LIST_LIMIT: &str = "500";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePage {
    pub title: String,
    pub namespace: i32,
    pub page_id: i64,
    pub revision_id: i64,
    pub timestamp: String,
    pub content: String,
}

pub trait WikiReadApi {
    /// Titles in `namespace`, alphabetically from `from` when given.
    fn get_all_pages(&mut self, namespace: i32, from: Option<&str>) -> Result<Vec<String>>;
    fn get_category_members(&mut self, category: &str) -> Result<Vec<String>>;
    fn get_page_contents(&mut self, titles: &[String]) -> Result<Vec<RemotePage>>;
    fn request_count(&self) -> usize;
}

pub trait WikiWriteApi: WikiReadApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    /// Saves `content`; `base_timestamp` makes the wiki reject edits that race
    /// with someone else's.
    fn edit_page(
        &mut self,
        title: &str,
        content: &str,
        summary: &str,
        base_timestamp: Option<&str>,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub read_interval_ms: u64,
    /// Pause between saved edits, from `[bot].edit_delay_ms`.
    pub edit_interval_ms: u64,
    pub retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &ViewbotConfig) -> Self {
        Self {
            api_url: config.api_url().unwrap_or_default(),
            user_agent: config.user_agent(),
            timeout_ms: env_value("WIKI_HTTP_TIMEOUT_MS", 30_000),
            read_interval_ms: env_value("WIKI_RATE_LIMIT_READ", 300),
            edit_interval_ms: config.bot.edit_delay_ms.unwrap_or(1_000),
            retries: env_value("WIKI_HTTP_RETRIES", 2),
            retry_delay_ms: env_value("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

/// Which way a call goes over the wire, and how long to wait before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Read,
    Login,
    Edit,
}

pub struct MediaWikiClient {
    client: Client,
    api_url: Url,
    retry: RetryPolicy,
    read_interval: Duration,
    edit_interval: Duration,
    throttle: Throttle,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            bail!("wiki API URL is not configured (set WIKI_API_URL or [wiki].api_url)");
        }
        let api_url = Url::parse(config.api_url.trim())
            .with_context(|| format!("invalid wiki API URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent)
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            api_url,
            retry: RetryPolicy {
                retries: config.retries,
                delay_ms: config.retry_delay_ms,
            },
            read_interval: Duration::from_millis(config.read_interval_ms),
            edit_interval: Duration::from_millis(config.edit_interval_ms),
            throttle: Throttle::default(),
            csrf_token: None,
        })
    }

    fn call<T: DeserializeOwned>(&self, call: Call, params: &[(&str, String)]) -> Result<T> {
        let pairs = api_pairs(params);
        let interval = match call {
            Call::Edit => self.edit_interval,
            Call::Read | Call::Login => self.read_interval,
        };
        let response = send_with_retry(self.retry, &self.throttle, interval, || match call {
            Call::Read => self.client.get(self.api_url.clone()).query(&pairs),
            Call::Login | Call::Edit => self.client.post(self.api_url.clone()).form(&pairs),
        })
        .context("MediaWiki API request failed")?;
        let payload: Value = response
            .json()
            .context("failed to decode MediaWiki API JSON response")?;
        serde_json::from_value(check_api_error(payload)?)
            .context("unexpected MediaWiki API response shape")
    }

    /// Fetches a `meta=tokens` token of the given type (`login`, `csrf`).
    fn token(&self, kind: &str) -> Result<String> {
        let response: TokenResponse = self.call(
            Call::Read,
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
                ("type", kind.to_string()),
            ],
        )?;
        response
            .query
            .tokens
            .get(&format!("{kind}token"))
            .cloned()
            .ok_or_else(|| anyhow!("MediaWiki returned no {kind} token"))
    }

    fn list_titles(
        &self,
        mut params: Vec<(&'static str, String)>,
        continue_key: &'static str,
    ) -> Result<Vec<String>> {
        let mut titles = Vec::new();
        loop {
            let response: QueryResponse = self.call(Call::Read, &params)?;
            let QueryPayload {
                allpages,
                categorymembers,
                ..
            } = response.query;
            titles.extend(allpages.into_iter().map(|item| item.title));
            titles.extend(categorymembers.into_iter().map(|item| item.title));

            let Some(next) = response
                .continuation
                .and_then(|mut cont| cont.remove(continue_key))
            else {
                break;
            };
            params.retain(|(key, _)| *key != continue_key);
            params.push((continue_key, next));
        }
        debug!(count = titles.len(), "listed titles");
        Ok(titles)
    }
}

impl WikiReadApi for MediaWikiClient {
    fn get_all_pages(&mut self, namespace: i32, from: Option<&str>) -> Result<Vec<String>> {
        let mut params = vec![
            ("action", "query".to_string()),
            ("list", "allpages".to_string()),
            ("apnamespace", namespace.to_string()),
            ("aplimit", LIST_LIMIT.to_string()),
        ];
        if let Some(from) = from {
            params.push(("apfrom", from.to_string()));
        }
        self.list_titles(params, "apcontinue")
    }

    fn get_category_members(&mut self, category: &str) -> Result<Vec<String>> {
        let params = vec![
            ("action", "query".to_string()),
            ("list", "categorymembers".to_string()),
            ("cmtitle", category_title(category)),
            ("cmtype", "page".to_string()),
            ("cmlimit", LIST_LIMIT.to_string()),
        ];
        self.list_titles(params, "cmcontinue")
    }

    fn get_page_contents(&mut self, titles: &[String]) -> Result<Vec<RemotePage>> {
        let mut pages = Vec::with_capacity(titles.len());
        for batch in titles.chunks(PAGE_BATCH_SIZE) {
            let response: QueryResponse = self.call(
                Call::Read,
                &[
                    ("action", "query".to_string()),
                    ("titles", batch.join("|")),
                    ("prop", "revisions".to_string()),
                    ("rvprop", "content|timestamp|ids".to_string()),
                    ("rvslots", "main".to_string()),
                ],
            )?;
            pages.extend(response.query.pages.into_iter().filter_map(remote_page));
        }
        Ok(pages)
    }

    fn request_count(&self) -> usize {
        self.throttle.requests()
    }
}

impl WikiWriteApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let login_token = self.token("login")?;
        let response: LoginResponse = self.call(
            Call::Login,
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
        )?;
        if response.login.result != "Success" {
            bail!(
                "MediaWiki login failed for {username}: {}",
                response.login.reason.unwrap_or(response.login.result)
            );
        }
        info!(user = username, "logged in");
        // Tokens are bound to the session, so any earlier one is stale.
        self.csrf_token = None;
        Ok(())
    }

    fn edit_page(
        &mut self,
        title: &str,
        content: &str,
        summary: &str,
        base_timestamp: Option<&str>,
    ) -> Result<()> {
        let token = match self.csrf_token.clone() {
            Some(token) => token,
            None => {
                let token = self.token("csrf")?;
                self.csrf_token = Some(token.clone());
                token
            }
        };
        let mut params = vec![
            ("action", "edit".to_string()),
            ("title", title.to_string()),
            ("text", content.to_string()),
            ("summary", summary.to_string()),
            ("bot", "1".to_string()),
            ("nocreate", "1".to_string()),
        ];
        if let Some(timestamp) = base_timestamp {
            params.push(("basetimestamp", timestamp.to_string()));
        }
        params.push(("token", token));

        let response: EditResponse = self.call(Call::Edit, &params)?;
        match response.edit {
            Some(edit) if edit.result == "Success" => Ok(()),
            Some(edit) => bail!("MediaWiki edit of {title} returned {}", edit.result),
            None => bail!("MediaWiki edit of {title} returned no edit result"),
        }
    }
}

fn category_title(category: &str) -> String {
    let category = category.trim();
    if category.starts_with("Category:") {
        category.to_string()
    } else {
        format!("Category:{category}")
    }
}

fn api_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn check_api_error(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(payload)
}

fn remote_page(page: PageItem) -> Option<RemotePage> {
    if page.missing {
        return None;
    }
    let page_id = page.pageid?;
    let revision = page.revisions.into_iter().next()?;
    Some(RemotePage {
        title: page.title,
        namespace: page.ns,
        page_id,
        revision_id: revision.revid,
        timestamp: revision.timestamp,
        content: revision.slots.main.content,
    })
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    allpages: Vec<TitleItem>,
    #[serde(default)]
    categorymembers: Vec<TitleItem>,
    #[serde(default)]
    pages: Vec<PageItem>,
}

#[derive(Debug, Deserialize)]
struct TitleItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct PageItem {
    pageid: Option<i64>,
    ns: i32,
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    revisions: Vec<RevisionItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionItem {
    revid: i64,
    timestamp: String,
    slots: RevisionSlots,
}

#[derive(Debug, Deserialize)]
struct RevisionSlots {
    main: MainSlot,
}

#[derive(Debug, Deserialize)]
struct MainSlot {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    query: TokenQuery,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    tokens: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    login: LoginResult,
}

#[derive(Debug, Deserialize)]
struct LoginResult {
    result: String,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EditResponse {
    edit: Option<EditResult>,
}

#[derive(Debug, Deserialize)]
struct EditResult {
    result: String,
}
