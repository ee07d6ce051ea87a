use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::platform::Platform;
use crate::wikitext::{TemplateArgument, find_templates};

/// Name of the citation template that wraps each video link.
pub const LINK_TEMPLATE: &str = "#";

static NICONICO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"nicovideo\.jp/watch/([a-z0-9]+)$").expect("niconico link regex")
});
static YOUTUBE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"youtube\.com/watch\?v=([^\s/&]+)").expect("youtube link regex")
});
static BILIBILI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"bilibili\.com/video/([^\s/&]+)$").expect("bilibili link regex")
});

/// Video ids per platform in order of appearance, plus the total link count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkTable {
    links: BTreeMap<Platform, Vec<String>>,
    total: usize,
}

impl LinkTable {
    pub fn ids(&self, platform: Platform) -> &[String] {
        self.links.get(&platform).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn platforms(&self) -> impl Iterator<Item = Platform> + '_ {
        self.links.keys().copied()
    }

    /// The only (platform, id) pair when the table holds exactly one link.
    pub fn sole_link(&self) -> Option<(Platform, &str)> {
        if self.total != 1 {
            return None;
        }
        self.links
            .iter()
            .find_map(|(platform, ids)| ids.first().map(|id| (*platform, id.as_str())))
    }

    fn push(&mut self, platform: Platform, id: &str) {
        self.links.entry(platform).or_default().push(id.to_string());
        self.total += 1;
    }
}

impl FromIterator<(Platform, String)> for LinkTable {
    fn from_iter<T: IntoIterator<Item = (Platform, String)>>(iter: T) -> Self {
        let mut table = LinkTable::default();
        for (platform, id) in iter {
            table.push(platform, &id);
        }
        table
    }
}

/// Collects the video links cited through `{{#|<url>}}` entries in `markup`.
pub fn extract_links(markup: &str) -> LinkTable {
    let mut table = LinkTable::default();
    for template in find_templates(markup, LINK_TEMPLATE) {
        let Some(argument) = template.first_argument() else {
            continue;
        };
        let link = link_text(argument);
        if link.is_empty() {
            continue;
        }
        if let Some((platform, id)) = match_video_link(&link) {
            table.push(platform, &id);
        }
    }
    table
}

pub fn match_video_link(link: &str) -> Option<(Platform, String)> {
    let patterns: [(Platform, &Regex); 3] = [
        (Platform::NicoNico, &NICONICO_RE),
        (Platform::YouTube, &YOUTUBE_RE),
        (Platform::Bilibili, &BILIBILI_RE),
    ];
    for (platform, pattern) in patterns {
        if let Some(captures) = pattern.captures(link) {
            return Some((platform, captures[1].to_string()));
        }
    }
    None
}

// MediaWiki reads `watch?v=<id>` as a named argument, so glue it back together.
fn link_text(argument: &TemplateArgument) -> String {
    match &argument.name {
        Some(name) => format!("{name}={}", argument.value).trim().to_string(),
        None => argument.value.trim().to_string(),
    }
}
