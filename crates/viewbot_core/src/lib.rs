pub mod bot;
pub mod bvid;
pub mod config;
pub mod format;
mod http;
pub mod infobox;
pub mod links;
pub mod mediawiki;
pub mod platform;
pub mod resolver;
pub mod scrapers;
pub mod update;
pub mod wikitext;
