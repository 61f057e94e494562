#![forbid(unsafe_code)]

//! Media lookup, download relay and page scraping behind the mediascout
//! HTTP server.

pub mod browser;
pub mod config;
pub mod metadata;
pub mod relay;
pub mod scrape;
pub mod security;
pub mod size;
pub mod ytdlp;
