use std::collections::{BTreeMap, HashMap};

use anyhow::{Result, bail};
use thiserror::Error;
use tracing::{debug, warn};

use crate::bvid::canonicalize;
use crate::platform::Platform;

/// Anything that can report the current view count of one platform's videos.
pub trait ViewCountSource {
    fn platform(&self) -> Platform;
    fn fetch_view_count(&self, id: &str) -> Result<u64>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no view count source registered for {0}")]
    NoSource(Platform),
    #[error("failed to fetch {platform} view count for {id}: {message}")]
    Fetch {
        platform: Platform,
        id: String,
        message: String,
    },
}

/// Dispatches lookups to the registered source for each platform.
#[derive(Default)]
pub struct ViewResolver {
    sources: BTreeMap<Platform, Box<dyn ViewCountSource>>,
}

impl ViewResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl ViewCountSource + 'static) -> Self {
        self.register(Box::new(source));
        self
    }

    pub fn register(&mut self, source: Box<dyn ViewCountSource>) {
        self.sources.insert(source.platform(), source);
    }

    pub fn supports(&self, platform: Platform) -> bool {
        self.sources.contains_key(&platform)
    }

    /// Never panics or propagates a transport fault; every failure becomes a
    /// `ResolveError`. Zero is a valid answer here.
    pub fn resolve(&self, platform: Platform, id: &str) -> Result<u64, ResolveError> {
        let source = self
            .sources
            .get(&platform)
            .ok_or(ResolveError::NoSource(platform))?;
        let request_id = request_id(platform, id);
        match source.fetch_view_count(&request_id) {
            Ok(views) => {
                debug!(%platform, id = %request_id, views, "resolved view count");
                Ok(views)
            }
            Err(error) => {
                warn!(%platform, id = %request_id, "view count lookup failed: {error:#}");
                Err(ResolveError::Fetch {
                    platform,
                    id: request_id,
                    message: format!("{error:#}"),
                })
            }
        }
    }
}

pub fn request_id(platform: Platform, id: &str) -> String {
    match platform {
        Platform::Bilibili => canonicalize(id),
        Platform::YouTube | Platform::NicoNico => id.to_string(),
    }
}

/// Fixed counts keyed by id, for tests and offline runs.
#[derive(Debug, Clone)]
pub struct StaticViewCounts {
    platform: Platform,
    counts: HashMap<String, u64>,
}

impl StaticViewCounts {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            counts: HashMap::new(),
        }
    }

    pub fn with(mut self, id: &str, views: u64) -> Self {
        self.counts.insert(id.to_string(), views);
        self
    }
}

impl ViewCountSource for StaticViewCounts {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn fetch_view_count(&self, id: &str) -> Result<u64> {
        match self.counts.get(id) {
            Some(views) => Ok(*views),
            None => bail!("unknown video id {id}"),
        }
    }
}
