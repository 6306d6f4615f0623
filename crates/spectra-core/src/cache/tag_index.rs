//! Bidirectional index between cache keys and the tags they provide.

use crate::types::{CacheKey, Tag, TagId};
use ahash::{AHashMap, AHashSet};
use std::collections::BTreeSet;

/// Keys providing tags of one type.
#[derive(Debug, Default)]
struct TypeBucket {
    /// Keys providing the bare `{type}` tag.
    untagged: AHashSet<CacheKey>,
    /// Keys providing `{type, id}`, per id.
    by_id: AHashMap<TagId, AHashSet<CacheKey>>,
}

impl TypeBucket {
    fn is_empty(&self) -> bool {
        self.untagged.is_empty() && self.by_id.is_empty()
    }
}

/// Tag → keys forward index plus key → tags inverse.
///
/// Invariant: `tags_for(key)` equals the set of tags whose forward entry contains `key`.
#[derive(Debug, Default)]
pub struct TagIndex {
    by_type: AHashMap<String, TypeBucket>,
    by_key: AHashMap<CacheKey, BTreeSet<Tag>>,
}

impl TagIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the tag set of `key`. Idempotent; an empty set removes the key.
    pub fn register_provided_tags(&mut self, key: &CacheKey, tags: &BTreeSet<Tag>) {
        let previous = self.by_key.remove(key).unwrap_or_default();

        for stale in previous.difference(tags) {
            self.unlink(key, stale);
        }
        for fresh in tags.difference(&previous) {
            self.link(key, fresh);
        }

        if !tags.is_empty() {
            self.by_key.insert(key.clone(), tags.clone());
        }
    }

    /// Drops every link for `key`.
    pub fn remove_key(&mut self, key: &CacheKey) {
        if let Some(previous) = self.by_key.remove(key) {
            for tag in &previous {
                self.unlink(key, tag);
            }
        }
    }

    /// Keys reached by invalidating `tags`.
    ///
    /// `{type}` reaches every key providing any tag of that type; `{type, id}` reaches keys
    /// that provide exactly `{type, id}`. Unknown tags resolve to nothing.
    #[must_use]
    pub fn resolve<'a>(&self, tags: impl IntoIterator<Item = &'a Tag>) -> BTreeSet<CacheKey> {
        let mut keys = BTreeSet::new();

        for tag in tags {
            let Some(bucket) = self.by_type.get(&tag.tag_type) else {
                continue;
            };
            match &tag.id {
                None => {
                    keys.extend(bucket.untagged.iter().cloned());
                    for ids in bucket.by_id.values() {
                        keys.extend(ids.iter().cloned());
                    }
                }
                Some(id) => {
                    if let Some(ids) = bucket.by_id.get(id) {
                        keys.extend(ids.iter().cloned());
                    }
                }
            }
        }

        keys
    }

    #[must_use]
    pub fn tags_for(&self, key: &CacheKey) -> Option<&BTreeSet<Tag>> {
        self.by_key.get(key)
    }

    /// Number of keys with at least one tag.
    #[must_use]
    pub fn tagged_keys(&self) -> usize {
        self.by_key.len()
    }

    /// Number of distinct tags across all keys.
    #[must_use]
    pub fn distinct_tags(&self) -> usize {
        self.by_type
            .values()
            .map(|bucket| usize::from(!bucket.untagged.is_empty()) + bucket.by_id.len())
            .sum()
    }

    pub fn clear(&mut self) {
        self.by_type.clear();
        self.by_key.clear();
    }

    /// Verifies that the forward and inverse maps agree.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let forward_links: usize = self
            .by_type
            .values()
            .map(|bucket| bucket.untagged.len() + bucket.by_id.values().map(|keys| keys.len()).sum::<usize>())
            .sum();
        let inverse_links: usize = self.by_key.values().map(BTreeSet::len).sum();

        forward_links == inverse_links &&
            self.by_key.iter().all(|(key, tags)| tags.iter().all(|tag| self.has_link(key, tag)))
    }

    fn has_link(&self, key: &CacheKey, tag: &Tag) -> bool {
        let Some(bucket) = self.by_type.get(&tag.tag_type) else {
            return false;
        };
        match &tag.id {
            None => bucket.untagged.contains(key),
            Some(id) => bucket.by_id.get(id).is_some_and(|keys| keys.contains(key)),
        }
    }

    fn link(&mut self, key: &CacheKey, tag: &Tag) {
        let bucket = self.by_type.entry(tag.tag_type.clone()).or_default();
        match &tag.id {
            None => {
                bucket.untagged.insert(key.clone());
            }
            Some(id) => {
                bucket.by_id.entry(id.clone()).or_default().insert(key.clone());
            }
        }
    }

    fn unlink(&mut self, key: &CacheKey, tag: &Tag) {
        let Some(bucket) = self.by_type.get_mut(&tag.tag_type) else {
            return;
        };
        match &tag.id {
            None => {
                bucket.untagged.remove(key);
            }
            Some(id) => {
                if let Some(keys) = bucket.by_id.get_mut(id) {
                    keys.remove(key);
                    if keys.is_empty() {
                        bucket.by_id.remove(id);
                    }
                }
            }
        }
        if bucket.is_empty() {
            self.by_type.remove(&tag.tag_type);
        }
    }
}
