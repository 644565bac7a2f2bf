use derive_new::new;
use serde::{Deserialize, Serialize};

use super::Slug;

/// Counters of one article, as returned by every ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, new)]
pub struct ArticleStats {
    pub slug: Slug,
    pub views: u64,
    pub likes: u64,
}

impl ArticleStats {
    pub fn empty(slug: Slug) -> Self {
        Self::new(slug, 0, 0)
    }
}
