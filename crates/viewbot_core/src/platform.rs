use std::fmt;

use anyhow::{Result, bail};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Bilibili,
    YouTube,
    NicoNico,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Bilibili, Platform::YouTube, Platform::NicoNico];

    /// Two-letter code used in `1,230 (NN)` style annotations.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Bilibili => "BB",
            Self::YouTube => "YT",
            Self::NicoNico => "NN",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|platform| platform.tag() == tag)
    }

    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if let Some(platform) = Self::from_tag(&trimmed.to_ascii_uppercase()) {
            return Ok(platform);
        }
        for platform in Self::ALL {
            if trimmed.eq_ignore_ascii_case(platform.name()) {
                return Ok(platform);
            }
        }
        bail!("unsupported platform: {value} (expected BB|YT|NN)")
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bilibili => "bilibili",
            Self::YouTube => "youtube",
            Self::NicoNico => "niconico",
        }
    }

    /// Regex alternation over every known tag, e.g. `BB|YT|NN`.
    pub fn tag_alternation() -> String {
        Self::ALL
            .iter()
            .map(|platform| platform.tag())
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
