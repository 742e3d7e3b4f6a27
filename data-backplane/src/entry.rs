//! Atomic registry records and the cache identity used to diff them.

use std::fmt::{Display, Formatter};

/// One record of shared state: an opaque `data` payload published by `owner`
/// under the registry channel `entry_type`.
///
/// `(owner, entry_type)` is the natural key. Two entries with the same key and
/// different `data` are versions of the same record; the newer one wins.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    pub owner: String,
    pub entry_type: String,
    pub data: String,
}

impl Entry {
    pub fn new(
        owner: impl Into<String>,
        entry_type: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            entry_type: entry_type.into(),
            data: data.into(),
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            owner: self.owner.clone(),
            entry_type: self.entry_type.clone(),
        }
    }
}

impl Display for Entry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[owner: {}, type: {}]", self.owner, self.entry_type)
    }
}

/// Natural key of an [`Entry`] inside the client's snapshot cache.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CacheKey {
    pub owner: String,
    pub entry_type: String,
}

#[cfg(test)]
mod tests {
    use super::Entry;

    #[test]
    fn entries_with_same_key_and_different_data_share_a_cache_key() {
        let first = Entry::new("instance-a", "HandledMessages", "v1");
        let second = Entry::new("instance-a", "HandledMessages", "v2");

        assert_ne!(first, second);
        assert_eq!(first.cache_key(), second.cache_key());
    }

    #[test]
    fn cache_key_distinguishes_owner_and_type() {
        let base = Entry::new("instance-a", "HandledMessages", "v1");
        let other_owner = Entry::new("instance-b", "HandledMessages", "v1");
        let other_type = Entry::new("instance-a", "Metrics", "v1");

        assert_ne!(base.cache_key(), other_owner.cache_key());
        assert_ne!(base.cache_key(), other_type.cache_key());
    }
}
