use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::prelude::*;

use crate::data::{ContentItem, ContentKind, WordEntry};
use crate::services::ContentCatalog;

/// In-memory content catalog.
///
/// Development stand-in for the external catalog store; deleted entries are
/// tombstoned the same way the real store soft-deletes rows.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    inner: Mutex<CatalogInner>,
}

#[derive(Debug, Default)]
struct CatalogInner {
    contents: HashMap<i64, StoredContent>,
    words: Vec<WordEntry>,
}

#[derive(Debug)]
struct StoredContent {
    item: ContentItem,
    deleted: bool,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_content(&self, item: ContentItem) {
        let mut inner = self.inner.lock().expect("catalog poisoned");
        inner.contents.insert(
            item.id,
            StoredContent {
                item,
                deleted: false,
            },
        );
    }

    pub fn insert_word(&self, word: WordEntry) {
        let mut inner = self.inner.lock().expect("catalog poisoned");
        inner.words.push(word);
    }

    fn live_of_kind(
        inner: &CatalogInner,
        kind: ContentKind,
        category: Option<&str>,
    ) -> Vec<ContentItem> {
        inner
            .contents
            .values()
            .filter(|stored| !stored.deleted && stored.item.kind == kind)
            .filter(|stored| match category {
                Some(category) => stored.item.category.as_deref() == Some(category),
                None => true,
            })
            .map(|stored| stored.item.clone())
            .collect()
    }

    fn random_of_kind(
        &self,
        kind: ContentKind,
        category: Option<&str>,
    ) -> Option<ContentItem> {
        let inner = self.inner.lock().expect("catalog poisoned");
        let candidates = Self::live_of_kind(&inner, kind, category);
        candidates.into_iter().choose(&mut rand::rng())
    }
}

#[async_trait]
impl ContentCatalog for MemoryCatalog {
    async fn random_story(&self, category: Option<&str>) -> eyre::Result<Option<ContentItem>> {
        Ok(self.random_of_kind(ContentKind::Story, category))
    }

    async fn random_music(&self, category: Option<&str>) -> eyre::Result<Option<ContentItem>> {
        Ok(self.random_of_kind(ContentKind::Music, category))
    }

    async fn content_by_name(
        &self,
        kind: ContentKind,
        name: &str,
    ) -> eyre::Result<Option<ContentItem>> {
        let inner = self.inner.lock().expect("catalog poisoned");
        Ok(inner
            .contents
            .values()
            .filter(|stored| !stored.deleted && stored.item.kind == kind)
            .find(|stored| stored.item.title.contains(name) || name.contains(&stored.item.title))
            .map(|stored| stored.item.clone()))
    }

    async fn content_by_id(&self, id: i64) -> eyre::Result<Option<ContentItem>> {
        let inner = self.inner.lock().expect("catalog poisoned");
        Ok(inner
            .contents
            .get(&id)
            .filter(|stored| !stored.deleted)
            .map(|stored| stored.item.clone()))
    }

    async fn search_by_artist(
        &self,
        artist: &str,
        kind: ContentKind,
        limit: usize,
    ) -> eyre::Result<Vec<ContentItem>> {
        let inner = self.inner.lock().expect("catalog poisoned");
        let mut results: Vec<ContentItem> = inner
            .contents
            .values()
            .filter(|stored| !stored.deleted && stored.item.kind == kind)
            .filter(|stored| {
                stored
                    .item
                    .artist
                    .as_deref()
                    .is_some_and(|a| a.contains(artist))
            })
            .map(|stored| stored.item.clone())
            .collect();
        results.sort_by_key(|item| item.id);
        results.truncate(limit);
        Ok(results)
    }

    async fn search_by_artist_and_title(
        &self,
        artist: &str,
        title: &str,
    ) -> eyre::Result<Option<ContentItem>> {
        let inner = self.inner.lock().expect("catalog poisoned");
        Ok(inner
            .contents
            .values()
            .filter(|stored| !stored.deleted)
            .find(|stored| {
                stored.item.title.contains(title)
                    && stored
                        .item
                        .artist
                        .as_deref()
                        .is_some_and(|a| a.contains(artist))
            })
            .map(|stored| stored.item.clone()))
    }

    async fn content_list(
        &self,
        kind: ContentKind,
        category: Option<&str>,
        limit: usize,
        shuffle: bool,
    ) -> eyre::Result<Vec<ContentItem>> {
        let inner = self.inner.lock().expect("catalog poisoned");
        let mut results = Self::live_of_kind(&inner, kind, category);
        results.sort_by_key(|item| item.id);
        if shuffle {
            results.shuffle(&mut rand::rng());
        }
        results.truncate(limit);
        Ok(results)
    }

    async fn smart_search(&self, keyword: &str, limit: usize) -> eyre::Result<Vec<ContentItem>> {
        let inner = self.inner.lock().expect("catalog poisoned");
        let mut results: Vec<ContentItem> = inner
            .contents
            .values()
            .filter(|stored| !stored.deleted)
            .filter(|stored| {
                stored.item.title.contains(keyword)
                    || stored
                        .item
                        .artist
                        .as_deref()
                        .is_some_and(|a| a.contains(keyword))
            })
            .map(|stored| stored.item.clone())
            .collect();
        results.sort_by_key(|item| item.id);
        results.truncate(limit);
        Ok(results)
    }

    async fn increment_play_count(&self, id: i64) -> eyre::Result<()> {
        let mut inner = self.inner.lock().expect("catalog poisoned");
        if let Some(stored) = inner.contents.get_mut(&id) {
            stored.item.play_count += 1;
        }
        Ok(())
    }

    async fn delete_content(&self, id: i64, hard: bool) -> eyre::Result<bool> {
        let mut inner = self.inner.lock().expect("catalog poisoned");
        if hard {
            return Ok(inner.contents.remove(&id).is_some());
        }
        match inner.contents.get_mut(&id) {
            Some(stored) => {
                stored.deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn random_word(&self, _level: Option<&str>) -> eyre::Result<Option<WordEntry>> {
        let inner = self.inner.lock().expect("catalog poisoned");
        Ok(inner.words.iter().choose(&mut rand::rng()).cloned())
    }

    async fn word(&self, word: &str) -> eyre::Result<Option<WordEntry>> {
        let inner = self.inner.lock().expect("catalog poisoned");
        Ok(inner
            .words
            .iter()
            .find(|entry| entry.word.eq_ignore_ascii_case(word) || entry.translation == word)
            .cloned())
    }
}
