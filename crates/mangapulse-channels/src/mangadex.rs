//! MangaDex chapter source — title search plus latest-chapter feed.
//!
//! Every failure mode (network, API error, no matching title, empty feed)
//! collapses into `FetchOutcome::NotFound`; the engine retries the title on
//! its next rotation slot.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use mangapulse_core::config::FetcherConfig;
use mangapulse_core::error::Result;
use mangapulse_core::traits::ChapterFetcher;
use mangapulse_core::types::{ChapterInfo, FetchOutcome};

/// Chapter source backed by the MangaDex REST API.
pub struct MangaDexFetcher {
    config: FetcherConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MangaList {
    #[serde(default)]
    data: Vec<Manga>,
}

#[derive(Debug, Deserialize)]
struct Manga {
    id: String,
    attributes: MangaAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
struct MangaAttributes {
    #[serde(default)]
    title: HashMap<String, String>,
    #[serde(default, rename = "altTitles")]
    alt_titles: Vec<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Option<RelationshipAttributes>,
}

#[derive(Debug, Deserialize)]
struct RelationshipAttributes {
    #[serde(default, rename = "fileName")]
    file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChapterFeed {
    #[serde(default)]
    data: Vec<ChapterItem>,
}

#[derive(Debug, Deserialize)]
struct ChapterItem {
    id: String,
    attributes: ChapterAttributes,
}

#[derive(Debug, Deserialize)]
struct ChapterAttributes {
    #[serde(default)]
    chapter: Option<String>,
}

impl MangaDexFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    async fn search(&self, title: &str) -> Option<MangaList> {
        let resp = self
            .client
            .get(format!("{}/manga", self.config.base_url))
            .query(&[
                ("title", title),
                ("limit", "5"),
                ("order[relevance]", "desc"),
                ("includes[]", "cover_art"),
            ])
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            tracing::debug!("MangaDex search for '{title}' returned {}", resp.status());
            return None;
        }
        resp.json().await.ok()
    }

    async fn latest_feed_entry(&self, manga_id: &str) -> Option<ChapterItem> {
        let resp = self
            .client
            .get(format!("{}/manga/{manga_id}/feed", self.config.base_url))
            .query(&[
                ("limit", "1"),
                ("order[chapter]", "desc"),
                ("translatedLanguage[]", "en"),
                ("includeFutureUpdates", "0"),
            ])
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let feed: ChapterFeed = resp.json().await.ok()?;
        feed.data.into_iter().next()
    }
}

#[async_trait]
impl ChapterFetcher for MangaDexFetcher {
    async fn latest_chapter(&self, title: &str) -> Result<FetchOutcome> {
        let Some(list) = self.search(title).await else {
            return Ok(FetchOutcome::NotFound);
        };
        let Some(manga) = best_match(title, &list.data) else {
            tracing::debug!("No MangaDex title match for '{title}'");
            return Ok(FetchOutcome::NotFound);
        };
        let Some(entry) = self.latest_feed_entry(&manga.id).await else {
            return Ok(FetchOutcome::NotFound);
        };
        let Some(chapter) = entry.attributes.chapter else {
            return Ok(FetchOutcome::NotFound);
        };

        Ok(FetchOutcome::Found(ChapterInfo {
            chapter,
            url: Some(format!("https://mangadex.org/chapter/{}", entry.id)),
            image: cover_url(manga),
        }))
    }
}

/// Pick the first search result whose title or alt title contains the
/// query, case-insensitively.
fn best_match<'a>(query: &str, candidates: &'a [Manga]) -> Option<&'a Manga> {
    let needle = query.to_lowercase();
    candidates.iter().find(|manga| {
        manga
            .attributes
            .title
            .values()
            .chain(manga.attributes.alt_titles.iter().flat_map(|m| m.values()))
            .any(|t| t.to_lowercase().contains(&needle))
    })
}

/// Cover image URL from the `cover_art` relationship, when included.
fn cover_url(manga: &Manga) -> Option<String> {
    manga
        .relationships
        .iter()
        .filter(|r| r.kind == "cover_art")
        .find_map(|r| r.attributes.as_ref().and_then(|a| a.file_name.clone()))
        .map(|file| format!("https://uploads.mangadex.org/covers/{}/{file}", manga.id))
}
