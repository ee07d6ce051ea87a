use std::env;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use similar::TextDiff;
use tracing::{error, info, warn};

use crate::config::ViewbotConfig;
use crate::infobox::{is_candidate_page, update_page};
use crate::mediawiki::{
    MediaWikiClient, MediaWikiClientConfig, PAGE_BATCH_SIZE, RemotePage, WikiWriteApi,
};
use crate::resolver::ViewResolver;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub namespace: i32,
    pub start: Option<String>,
    pub category: Option<String>,
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PageAction {
    Edited,
    WouldEdit,
    Unchanged,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub title: String,
    pub action: PageAction,
    pub detail: Option<String>,
    pub diff: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub dry_run: bool,
    pub scanned: usize,
    pub candidates: usize,
    pub changed: usize,
    pub edited: usize,
    /// Pages fetched without a song infobox.
    pub skipped: usize,
    pub errors: Vec<String>,
    pub pages: Vec<PageResult>,
    pub request_count: usize,
}

/// Runs against the configured wiki, logging in with `WIKI_BOT_USER` and
/// `WIKI_BOT_PASS` unless this is a dry run.
pub fn run_bot(
    config: &ViewbotConfig,
    options: &RunOptions,
    resolver: &ViewResolver,
) -> Result<RunReport> {
    let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_config(config))?;
    if options.dry_run {
        return run_with_api(&mut client, resolver, options, None);
    }
    let username = env::var("WIKI_BOT_USER")
        .map_err(|_| anyhow::anyhow!("WIKI_BOT_USER is required unless --dry-run is set"))?;
    let password = env::var("WIKI_BOT_PASS")
        .map_err(|_| anyhow::anyhow!("WIKI_BOT_PASS is required unless --dry-run is set"))?;
    run_with_api(
        &mut client,
        resolver,
        options,
        Some((username.trim(), password.trim())),
    )
}

pub fn run_with_api<A: WikiWriteApi>(
    api: &mut A,
    resolver: &ViewResolver,
    options: &RunOptions,
    credentials: Option<(&str, &str)>,
) -> Result<RunReport> {
    if options.summary.trim().is_empty() {
        bail!("edits require a non-empty summary");
    }
    if !options.dry_run {
        let Some((username, password)) = credentials else {
            bail!("credentials are required to save edits");
        };
        api.login(username, password).context("wiki login failed")?;
    }

    let mut titles = match &options.category {
        Some(category) => api.get_category_members(category)?,
        None => api.get_all_pages(options.namespace, options.start.as_deref())?,
    };
    if let Some(limit) = options.limit {
        titles.truncate(limit);
    }
    info!(pages = titles.len(), dry_run = options.dry_run, "starting view count run");

    let mut report = RunReport {
        success: true,
        dry_run: options.dry_run,
        scanned: 0,
        candidates: 0,
        changed: 0,
        edited: 0,
        skipped: 0,
        errors: Vec::new(),
        pages: Vec::new(),
        request_count: 0,
    };

    for batch in titles.chunks(PAGE_BATCH_SIZE) {
        let pages = api.get_page_contents(batch)?;
        for page in pages {
            report.scanned += 1;
            if !is_candidate_page(&page.content) {
                report.skipped += 1;
                continue;
            }
            report.candidates += 1;
            let result = process_page(api, resolver, options, &page, &mut report);
            report.pages.push(result);
        }
    }

    report.success = report.errors.is_empty();
    report.request_count = api.request_count();
    info!(
        scanned = report.scanned,
        changed = report.changed,
        edited = report.edited,
        errors = report.errors.len(),
        "view count run finished"
    );
    Ok(report)
}

fn process_page<A: WikiWriteApi>(
    api: &mut A,
    resolver: &ViewResolver,
    options: &RunOptions,
    page: &RemotePage,
    report: &mut RunReport,
) -> PageResult {
    let update = match update_page(&page.content, resolver) {
        Ok(update) => update,
        Err(error) => {
            error!(title = %page.title, "skipping page: {error:#}");
            report.errors.push(format!("{}: {error:#}", page.title));
            return PageResult {
                title: page.title.clone(),
                action: PageAction::Failed,
                detail: Some(format!("{error:#}")),
                diff: None,
            };
        }
    };

    if !update.changed {
        return PageResult {
            title: page.title.clone(),
            action: PageAction::Unchanged,
            detail: None,
            diff: None,
        };
    }
    report.changed += 1;
    let detail = update
        .templates
        .iter()
        .filter(|template| template.changed)
        .map(|template| format!("{} -> {}", template.before.trim(), template.after.trim()))
        .collect::<Vec<_>>()
        .join("; ");

    if options.dry_run {
        return PageResult {
            title: page.title.clone(),
            action: PageAction::WouldEdit,
            detail: Some(detail),
            diff: Some(unified_diff(&page.title, &page.content, &update.text)),
        };
    }

    match api.edit_page(
        &page.title,
        &update.text,
        &options.summary,
        Some(&page.timestamp),
    ) {
        Ok(()) => {
            info!(title = %page.title, %detail, "saved view count update");
            report.edited += 1;
            PageResult {
                title: page.title.clone(),
                action: PageAction::Edited,
                detail: Some(detail),
                diff: None,
            }
        }
        Err(error) => {
            warn!(title = %page.title, "edit failed: {error:#}");
            report.errors.push(format!("{}: {error:#}", page.title));
            PageResult {
                title: page.title.clone(),
                action: PageAction::Failed,
                detail: Some(format!("{error:#}")),
                diff: None,
            }
        }
    }
}

pub fn unified_diff(title: &str, before: &str, after: &str) -> String {
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(1)
        .header(&format!("a/{title}"), &format!("b/{title}"))
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{PageAction, RunOptions, run_with_api, unified_diff};
    use crate::mediawiki::{NS_MAIN, RemotePage, WikiReadApi, WikiWriteApi};
    use crate::platform::Platform;
    use crate::resolver::{StaticViewCounts, ViewResolver};

    #[derive(Default)]
    struct MockApi {
        all_pages: Vec<String>,
        category_members: Vec<String>,
        page_contents: BTreeMap<String, RemotePage>,
        edited_pages: Vec<(String, String, String)>,
        failing_edits: Vec<String>,
        logged_in: bool,
        request_count: usize,
    }

    impl MockApi {
        fn with_page(mut self, title: &str, content: &str) -> Self {
            self.all_pages.push(title.to_string());
            self.page_contents.insert(
                title.to_string(),
                RemotePage {
                    title: title.to_string(),
                    namespace: NS_MAIN,
                    page_id: 1,
                    revision_id: 2,
                    timestamp: "2026-10-01T00:00:00Z".to_string(),
                    content: content.to_string(),
                },
            );
            self
        }
    }

    impl WikiReadApi for MockApi {
        fn get_all_pages(
            &mut self,
            _namespace: i32,
            from: Option<&str>,
        ) -> anyhow::Result<Vec<String>> {
            self.request_count += 1;
            Ok(self
                .all_pages
                .iter()
                .filter(|title| from.is_none_or(|from| title.as_str() >= from))
                .cloned()
                .collect())
        }

        fn get_category_members(&mut self, _category: &str) -> anyhow::Result<Vec<String>> {
            self.request_count += 1;
            Ok(self.category_members.clone())
        }

        fn get_page_contents(&mut self, titles: &[String]) -> anyhow::Result<Vec<RemotePage>> {
            self.request_count += 1;
            Ok(titles
                .iter()
                .filter_map(|title| self.page_contents.get(title).cloned())
                .collect())
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }

    impl WikiWriteApi for MockApi {
        fn login(&mut self, _username: &str, _password: &str) -> anyhow::Result<()> {
            self.request_count += 1;
            self.logged_in = true;
            Ok(())
        }

        fn edit_page(
            &mut self,
            title: &str,
            content: &str,
            summary: &str,
            _base_timestamp: Option<&str>,
        ) -> anyhow::Result<()> {
            self.request_count += 1;
            if !self.logged_in {
                anyhow::bail!("not logged in");
            }
            if self.failing_edits.iter().any(|failing| failing == title) {
                anyhow::bail!("editconflict");
            }
            self.edited_pages
                .push((title.to_string(), content.to_string(), summary.to_string()));
            Ok(())
        }
    }

    fn resolver() -> ViewResolver {
        ViewResolver::new()
            .with_source(StaticViewCounts::new(Platform::NicoNico).with("sm1", 12_345))
            .with_source(StaticViewCounts::new(Platform::YouTube).with("yt1", 10))
    }

    fn options(dry_run: bool) -> RunOptions {
        RunOptions {
            namespace: NS_MAIN,
            start: None,
            category: None,
            limit: None,
            dry_run,
            summary: "update view count".to_string(),
        }
    }

    const SONG: &str = "{{Infobox Song\n|link={{#|https://www.nicovideo.jp/watch/sm1}}\n|#views=1,000\n}}";
    const BROKEN: &str = "{{Infobox Song\n|link={{#|https://www.youtube.com/watch?v=yt1}}\n|#views=5,000 (YT)\n}}";

    #[test]
    fn run_edits_changed_pages_and_skips_the_rest() {
        let mut api = MockApi::default()
            .with_page("Alpha", SONG)
            .with_page("Beta", "no infobox here")
            .with_page("Gamma", BROKEN);
        let report =
            run_with_api(&mut api, &resolver(), &options(false), Some(("bot", "secret")))
                .expect("run");

        assert_eq!(report.scanned, 3);
        assert_eq!(report.candidates, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.changed, 1);
        assert_eq!(report.edited, 1);
        assert!(!report.success);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Gamma:"));
        assert_eq!(api.edited_pages.len(), 1);
        let (title, content, summary) = &api.edited_pages[0];
        assert_eq!(title, "Alpha");
        assert_eq!(content, &SONG.replace("1,000", "12,000"));
        assert_eq!(summary, "update view count");
        assert_eq!(report.pages[0].action, PageAction::Edited);
        assert_eq!(report.pages[1].action, PageAction::Failed);
    }

    #[test]
    fn dry_run_never_logs_in_or_edits() {
        let mut api = MockApi::default().with_page("Alpha", SONG);
        let report = run_with_api(&mut api, &resolver(), &options(true), None).expect("run");
        assert!(!api.logged_in);
        assert!(api.edited_pages.is_empty());
        assert_eq!(report.changed, 1);
        assert_eq!(report.edited, 0);
        assert_eq!(report.pages[0].action, PageAction::WouldEdit);
        assert_eq!(report.pages[0].detail.as_deref(), Some("1,000 -> 12,000"));
        let diff = report.pages[0].diff.as_deref().expect("diff");
        assert!(diff.contains("-|#views=1,000"));
        assert!(diff.contains("+|#views=12,000"));
    }

    #[test]
    fn saving_requires_credentials_and_summary() {
        let mut api = MockApi::default().with_page("Alpha", SONG);
        assert!(run_with_api(&mut api, &resolver(), &options(false), None).is_err());

        let mut blank = options(true);
        blank.summary = "  ".to_string();
        assert!(run_with_api(&mut api, &resolver(), &blank, None).is_err());
    }

    #[test]
    fn start_limit_and_category_select_pages() {
        let mut api = MockApi::default()
            .with_page("Alpha", SONG)
            .with_page("Beta", SONG)
            .with_page("Gamma", SONG);
        let mut selected = options(true);
        selected.start = Some("Beta".to_string());
        selected.limit = Some(1);
        let report = run_with_api(&mut api, &resolver(), &selected, None).expect("run");
        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.pages[0].title, "Beta");

        api.category_members = vec!["Gamma".to_string()];
        let mut by_category = options(true);
        by_category.category = Some("Songs".to_string());
        let report = run_with_api(&mut api, &resolver(), &by_category, None).expect("run");
        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.pages[0].title, "Gamma");
    }

    #[test]
    fn failed_edits_are_recorded_and_do_not_stop_the_run() {
        let mut api = MockApi::default()
            .with_page("Alpha", SONG)
            .with_page("Beta", SONG);
        api.failing_edits = vec!["Alpha".to_string()];
        let report =
            run_with_api(&mut api, &resolver(), &options(false), Some(("bot", "secret")))
                .expect("run");
        assert_eq!(report.changed, 2);
        assert_eq!(report.edited, 1);
        assert_eq!(report.pages[0].action, PageAction::Failed);
        assert_eq!(report.pages[1].action, PageAction::Edited);
        assert!(report.request_count > 0);
    }

    #[test]
    fn unified_diff_marks_changed_lines() {
        let diff = unified_diff("Song", "a\nb\n", "a\nc\n");
        assert!(diff.contains("--- a/Song"));
        assert!(diff.contains("-b"));
        assert!(diff.contains("+c"));
    }
}
