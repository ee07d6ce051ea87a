//! Locates view counts in a display string, refreshes them and decides
//! whether the string is worth rewriting at all.

use std::ops::Range;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::format::{format_views, parse_views};
use crate::links::LinkTable;
use crate::platform::Platform;
use crate::resolver::ViewResolver;
use crate::wikitext::{TextEdit, apply_edits};

/// Counts below this are never worth an edit.
pub const MIN_UPDATE_VIEWS: u64 = 1000;

static TAGGED_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"(?:^| )(?P<views>[\d,]+)\+? \((?P<tag>{})\)",
        Platform::tag_alternation()
    );
    Regex::new(&pattern).expect("tagged views regex")
});
// Grouped digits; a lone `,` in prose is not a number.
static NUMBER_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\d,]*\d[\d,]*").expect("number token regex"));
static BARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\s|^)(?P<views>[\d,]+)\+?(?:\s|$)").expect("bare views regex")
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("single-link fallback expected exactly one bare count, found {found}")]
    FallbackMatchCount { found: usize },
    #[error("view count went backwards: {new} < {old}")]
    CountDecreased { old: u64, new: u64 },
    #[error("cannot rewrite view counts: {0}")]
    Rewrite(String),
}

/// A number found in the display string, with the byte range of its digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSpan {
    pub matched: String,
    pub views: Option<u64>,
    pub platform: Platform,
    pub views_span: Range<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SpanOutcome {
    Refreshed { old: u64, new: u64 },
    Unchanged { old: u64, new: u64 },
    Unparsable,
    AmbiguousIds { count: usize },
    Unresolved,
    NonPositive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpanReport {
    pub matched: String,
    pub platform: Platform,
    pub outcome: SpanOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewUpdate {
    pub text: String,
    pub changed: bool,
    /// Whether the single-link fallback attributed a bare number.
    pub permissive: bool,
    pub spans: Vec<SpanReport>,
}

/// `old` must not exceed `new`; public counters only grow.
pub fn should_update_views(old: u64, new: u64) -> Result<bool, UpdateError> {
    if old > new {
        return Err(UpdateError::CountDecreased { old, new });
    }
    let grew_enough = u128::from(new) * 2 >= u128::from(old) * 3;
    Ok(new >= MIN_UPDATE_VIEWS && grew_enough)
}

/// Finds the spans to consider and reports whether the single-link fallback
/// was used to attribute them.
pub fn find_candidate_spans(
    display: &str,
    links: &LinkTable,
) -> Result<(Vec<CandidateSpan>, bool), UpdateError> {
    let tagged = TAGGED_RE
        .captures_iter(display)
        .filter_map(|captures| {
            let platform = Platform::from_tag(&captures["tag"])?;
            candidate(&captures, platform)
        })
        .collect::<Vec<_>>();
    if !tagged.is_empty() {
        return Ok((tagged, false));
    }

    let Some((platform, _)) = links.sole_link() else {
        return Ok((Vec::new(), false));
    };
    if NUMBER_TOKEN_RE.find_iter(display).count() != 1 {
        return Ok((Vec::new(), false));
    }

    let bare = BARE_RE
        .captures_iter(display)
        .filter_map(|captures| candidate(&captures, platform))
        .collect::<Vec<_>>();
    if bare.len() != 1 {
        return Err(UpdateError::FallbackMatchCount { found: bare.len() });
    }
    Ok((bare, true))
}

/// Refreshes every view count in `display` that maps to exactly one video.
///
/// The string is rewritten only when at least one span is update-worthy, and
/// then only the worthy spans change. Lookup failures leave their span alone.
pub fn update_views(
    display: &str,
    links: &LinkTable,
    resolver: &ViewResolver,
) -> Result<ViewUpdate, UpdateError> {
    let (candidates, permissive) = find_candidate_spans(display, links)?;

    let mut spans = Vec::with_capacity(candidates.len());
    let mut edits = Vec::new();
    for candidate in candidates {
        let outcome = evaluate(&candidate, links, resolver)?;
        if let SpanOutcome::Refreshed { new, .. } = outcome {
            edits.push(TextEdit {
                span: candidate.views_span.clone(),
                replacement: format_views(new),
            });
        }
        debug!(
            matched = %candidate.matched,
            platform = %candidate.platform,
            ?outcome,
            "evaluated view span"
        );
        spans.push(SpanReport {
            matched: candidate.matched,
            platform: candidate.platform,
            outcome,
        });
    }

    if edits.is_empty() {
        return Ok(ViewUpdate {
            text: display.to_string(),
            changed: false,
            permissive,
            spans,
        });
    }

    let text = rewrite(display, edits)?;
    Ok(ViewUpdate {
        changed: text != display,
        text,
        permissive,
        spans,
    })
}

fn rewrite(display: &str, edits: Vec<TextEdit>) -> Result<String, UpdateError> {
    apply_edits(display, edits).map_err(|error| UpdateError::Rewrite(format!("{error:#}")))
}

fn evaluate(
    candidate: &CandidateSpan,
    links: &LinkTable,
    resolver: &ViewResolver,
) -> Result<SpanOutcome, UpdateError> {
    let Some(old) = candidate.views else {
        return Ok(SpanOutcome::Unparsable);
    };
    // Several uploads to one site: no way to tell which count is meant.
    let ids = links.ids(candidate.platform);
    if ids.len() != 1 {
        return Ok(SpanOutcome::AmbiguousIds { count: ids.len() });
    }
    let new = match resolver.resolve(candidate.platform, &ids[0]) {
        Ok(views) => views,
        Err(_) => return Ok(SpanOutcome::Unresolved),
    };
    if new == 0 {
        return Ok(SpanOutcome::NonPositive);
    }
    if should_update_views(old, new)? {
        Ok(SpanOutcome::Refreshed { old, new })
    } else {
        Ok(SpanOutcome::Unchanged { old, new })
    }
}

fn candidate(captures: &Captures<'_>, platform: Platform) -> Option<CandidateSpan> {
    let views = captures.name("views")?;
    Some(CandidateSpan {
        matched: captures[0].to_string(),
        views: parse_views(views.as_str()),
        platform,
        views_span: views.range(),
    })
}
