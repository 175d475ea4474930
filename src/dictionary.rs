//! Dictionary lookup used by `IN_DICTIONARY` terms.
//!
//! Dictionaries live outside the search engine. The query builder only needs
//! to resolve a reference into a list of match words, one per line of the
//! dictionary's combined data.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::expression::DictionaryRef;

/// Resolves dictionary references into their match words.
pub trait DictionaryStore: Send + Sync {
    /// Return the words of the referenced dictionary, one entry per
    /// non-empty line, or None if the dictionary does not exist.
    fn words(&self, dictionary: &DictionaryRef) -> Option<Vec<String>>;
}

/// In-memory dictionary store keyed by dictionary uuid.
#[derive(Default)]
pub struct InMemoryDictionaryStore {
    data: RwLock<HashMap<String, String>>,
}

impl InMemoryDictionaryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a dictionary's combined data.
    pub fn put<S: Into<String>>(&self, uuid: S, data: S) {
        self.data.write().insert(uuid.into(), data.into());
    }
}

impl DictionaryStore for InMemoryDictionaryStore {
    fn words(&self, dictionary: &DictionaryRef) -> Option<Vec<String>> {
        self.data.read().get(&dictionary.uuid).map(|data| {
            data.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_lookup() {
        let store = InMemoryDictionaryStore::new();
        store.put("dict-1", "alpha\nbeta\n\n  gamma  \n");

        let dict = DictionaryRef::new("dict-1", "Test dictionary");
        let words = store.words(&dict).unwrap();
        assert_eq!(words, vec!["alpha", "beta", "gamma"]);

        let missing = DictionaryRef::new("dict-2", "Missing");
        assert!(store.words(&missing).is_none());
    }
}
