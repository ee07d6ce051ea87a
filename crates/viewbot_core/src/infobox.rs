use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::links::extract_links;
use crate::resolver::ViewResolver;
use crate::update::{SpanReport, update_views};
use crate::wikitext::{TextEdit, apply_edits, find_templates};

pub const INFOBOX_TEMPLATE: &str = "Infobox Song";
pub const VIEWS_ARG: &str = "#views";
pub const LINK_ARG: &str = "link";

static INFOBOX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)infobox[ _]song").expect("infobox regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateUpdate {
    pub before: String,
    pub after: String,
    pub changed: bool,
    pub link_count: usize,
    pub spans: Vec<SpanReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageUpdate {
    pub text: String,
    pub changed: bool,
    pub templates: Vec<TemplateUpdate>,
}

/// Cheap pre-filter before parsing a page.
pub fn is_candidate_page(text: &str) -> bool {
    INFOBOX_RE.is_match(text)
}

/// Refreshes the `#views` argument of every song infobox on the page.
///
/// Errors carry an [`UpdateError`](crate::update::UpdateError) when the page
/// contradicts the engine's assumptions; nothing on such a page is changed.
pub fn update_page(text: &str, resolver: &ViewResolver) -> Result<PageUpdate> {
    let mut templates = Vec::new();
    let mut edits = Vec::new();

    for template in find_templates(text, INFOBOX_TEMPLATE) {
        let (Some(views), Some(link)) = (template.get_arg(VIEWS_ARG), template.get_arg(LINK_ARG))
        else {
            debug!(span = ?template.span, "infobox without #views or link");
            continue;
        };
        let links = extract_links(&link.value);
        let update = update_views(&views.value, &links, resolver)
            .with_context(|| format!("cannot refresh view count {:?}", views.value.trim()))?;
        if update.changed {
            edits.push(TextEdit {
                span: views.value_span.clone(),
                replacement: update.text.clone(),
            });
        }
        templates.push(TemplateUpdate {
            before: views.value.clone(),
            after: update.text,
            changed: update.changed,
            link_count: links.total(),
            spans: update.spans,
        });
    }

    if edits.is_empty() {
        return Ok(PageUpdate {
            text: text.to_string(),
            changed: false,
            templates,
        });
    }
    let updated = apply_edits(text, edits)?;
    Ok(PageUpdate {
        changed: updated != text,
        text: updated,
        templates,
    })
}

#[cfg(test)]
mod tests {
    use super::{is_candidate_page, update_page};
    use crate::platform::Platform;
    use crate::resolver::{StaticViewCounts, ViewResolver};
    use crate::update::UpdateError;

    fn resolver() -> ViewResolver {
        ViewResolver::new()
            .with_source(StaticViewCounts::new(Platform::NicoNico).with("sm42272597", 56_789))
            .with_source(StaticViewCounts::new(Platform::YouTube).with("S9EpjW70_fw", 2_345))
            .with_source(StaticViewCounts::new(Platform::Bilibili))
    }

    const PAGE: &str = "Intro text 1,000 (NN)\n\
{{Infobox Song\n\
|title = Example\n\
|link = {{#|https://www.nicovideo.jp/watch/sm42272597}} {{#|https://www.youtube.com/watch?v=S9EpjW70_fw}}\n\
|#views = 1,230 (NN), 2,000+ (YT)\n\
}}\n\
Body 5 (YT)";

    #[test]
    fn candidate_pages_mention_the_infobox() {
        assert!(is_candidate_page(PAGE));
        assert!(is_candidate_page("{{infobox_song}}"));
        assert!(!is_candidate_page("{{Infobox Album}}"));
    }

    #[test]
    fn update_page_rewrites_only_the_views_argument() {
        let update = update_page(PAGE, &resolver()).expect("update");
        assert!(update.changed);
        assert_eq!(
            update.text,
            PAGE.replace("1,230 (NN), 2,000+ (YT)", "56,000 (NN), 2,000+ (YT)")
        );
        assert_eq!(update.templates.len(), 1);
        assert_eq!(update.templates[0].link_count, 2);
        assert_eq!(update.templates[0].before, " 1,230 (NN), 2,000+ (YT)\n");
    }

    #[test]
    fn templates_missing_arguments_are_skipped() {
        let page = "{{Infobox Song|#views=1,000 (NN)}} {{Infobox Song|link={{#|https://www.nicovideo.jp/watch/sm42272597}}}}";
        let update = update_page(page, &resolver()).expect("update");
        assert!(!update.changed);
        assert!(update.templates.is_empty());
        assert_eq!(update.text, page);
    }

    #[test]
    fn every_infobox_on_the_page_is_processed() {
        let page = "{{Infobox Song|link={{#|https://www.nicovideo.jp/watch/sm42272597}}|#views=900}}\n\
{{infobox song|link={{#|https://www.youtube.com/watch?v=S9EpjW70_fw}}|#views=1,000+}}";
        let update = update_page(page, &resolver()).expect("update");
        assert_eq!(
            update.text,
            "{{Infobox Song|link={{#|https://www.nicovideo.jp/watch/sm42272597}}|#views=56,000}}\n\
{{infobox song|link={{#|https://www.youtube.com/watch?v=S9EpjW70_fw}}|#views=2,300+}}"
        );
        assert!(update.templates.iter().all(|template| template.changed));
    }

    #[test]
    fn engine_errors_abort_the_page() {
        let page = "{{Infobox Song|link={{#|https://www.youtube.com/watch?v=S9EpjW70_fw}}|#views=9,000 (YT)}}";
        let error = update_page(page, &resolver()).expect_err("must fail");
        assert_eq!(
            error.downcast_ref::<UpdateError>(),
            Some(&UpdateError::CountDecreased { old: 9000, new: 2345 })
        );
    }
}
