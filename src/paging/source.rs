//! The data-source boundary and pager configuration.

use super::types::{LoadParams, LoadResult};
use crate::error::{PagingError, Result};
use serde::{Deserialize, Serialize};

/// Caller-supplied page loader.
///
/// `load` runs on a worker thread and may block. A panic inside it is
/// caught and reported as a failed load.
pub trait PagingSource<K, T>: Send + Sync + 'static {
    /// Load one page.
    fn load(&self, params: LoadParams<K>) -> LoadResult<K, T>;

    /// Key for the next `Append`, given the key returned by the last
    /// successful load and the list as it currently stands.
    ///
    /// The list includes external mutations, so sources keyed by offset or
    /// by last item can compute the key from it.
    fn append_key(&self, next_key: Option<&K>, _items: &[T]) -> Option<K>
    where
        K: Clone,
    {
        next_key.cloned()
    }
}

/// Pager configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    /// Items requested per `Append`.
    /// Default: 20
    pub page_size: usize,

    /// Items requested per `Refresh`.
    /// Default: 20
    pub initial_load_size: usize,

    /// Accessing an item within this distance of the end triggers an append.
    /// Default: 20
    pub prefetch_distance: usize,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self::new(20)
    }
}

impl PagingConfig {
    /// Config with every size set to `page_size`.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            initial_load_size: page_size,
            prefetch_distance: page_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(PagingError::InvalidConfig(
                "page_size must be at least 1".to_string(),
            ));
        }
        if self.initial_load_size == 0 {
            return Err(PagingError::InvalidConfig(
                "initial_load_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
