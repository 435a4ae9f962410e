//! Inverted tag index
//!
//! Maps each tag to the set of ids carrying it, and each id back to its
//! tags so an entry can be re-tagged or dropped without scanning.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default, Clone)]
pub struct TagIndex {
    by_tag: HashMap<String, BTreeSet<String>>,
    by_id: HashMap<String, BTreeSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tags of `id`, replacing whatever it carried before.
    ///
    /// Inserting the same id with the same tags again leaves the index
    /// unchanged.
    pub fn insert(&mut self, id: &str, tags: &[String]) {
        self.remove(id);

        if tags.is_empty() {
            return;
        }

        let tags: BTreeSet<String> = tags.iter().cloned().collect();
        for tag in &tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(id.to_string());
        }
        self.by_id.insert(id.to_string(), tags);
    }

    /// Drop `id` from every tag it carries
    pub fn remove(&mut self, id: &str) {
        let Some(tags) = self.by_id.remove(id) else {
            return;
        };

        for tag in tags {
            if let Some(ids) = self.by_tag.get_mut(&tag) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_tag.remove(&tag);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.by_tag.clear();
        self.by_id.clear();
    }

    /// Tags of a single id, sorted
    pub fn tags_of(&self, id: &str) -> Vec<String> {
        self.by_id
            .get(id)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every tag in use, sorted
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.by_tag.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Ids carrying all of `tags`
    pub fn matching_all(&self, tags: &[String]) -> BTreeSet<String> {
        let mut sets = tags.iter().map(|tag| self.by_tag.get(tag));

        let mut result = match sets.next() {
            Some(Some(first)) => first.clone(),
            _ => return BTreeSet::new(),
        };

        for set in sets {
            match set {
                Some(ids) => result.retain(|id| ids.contains(id)),
                None => return BTreeSet::new(),
            }
            if result.is_empty() {
                break;
            }
        }

        result
    }

    /// Ids carrying at least one of `tags`
    pub fn matching_any(&self, tags: &[String]) -> BTreeSet<String> {
        tags.iter()
            .filter_map(|tag| self.by_tag.get(tag))
            .flatten()
            .cloned()
            .collect()
    }

    /// Ids from `all_ids` carrying none of `tags`
    pub fn not_matching<'a, I>(&self, tags: &[String], all_ids: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let excluded = self.matching_any(tags);
        all_ids
            .into_iter()
            .filter(|id| !excluded.contains(*id))
            .cloned()
            .collect()
    }
}
