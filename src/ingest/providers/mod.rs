// src/ingest/providers/mod.rs
pub mod fixture;
pub mod rss;

pub use fixture::{FixtureResponse, FixtureRetriever};
pub use rss::HttpRssRetriever;
