//! Paging value types: load states, parameters, results and events.

use crate::runtime::panic_message;
use crate::types::UpdateOp;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Which end of the list a load extends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadType {
    /// Replace the list from the initial key.
    Refresh,
    /// Extend the list at the end from the last known next key.
    Append,
}

/// Status of one load type.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum LoadState {
    /// Nothing loaded yet, or ready for the next load.
    #[default]
    Incomplete,
    Loading,
    Success { end_of_pagination_reached: bool },
    /// Terminal until `retry()`.
    Failure(LoadError),
}

impl LoadState {
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, LoadState::Failure(_))
    }

    /// Whether no further loads of this type will produce data.
    pub fn end_of_pagination_reached(&self) -> bool {
        matches!(
            self,
            LoadState::Success {
                end_of_pagination_reached: true
            }
        )
    }
}

/// Load status for both load types of one list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadStates {
    pub refresh: LoadState,
    pub append: LoadState,
}

impl LoadStates {
    pub fn get(&self, load_type: LoadType) -> &LoadState {
        match load_type {
            LoadType::Refresh => &self.refresh,
            LoadType::Append => &self.append,
        }
    }

    pub(crate) fn set(&mut self, load_type: LoadType, state: LoadState) {
        match load_type {
            LoadType::Refresh => self.refresh = state,
            LoadType::Append => self.append = state,
        }
    }
}

/// Arguments for one call into a [`PagingSource`](super::PagingSource).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadParams<K> {
    /// `key` is the initial key the pager was created with.
    Refresh { key: Option<K>, load_size: usize },
    Append { key: K, load_size: usize },
}

impl<K> LoadParams<K> {
    pub fn load_type(&self) -> LoadType {
        match self {
            LoadParams::Refresh { .. } => LoadType::Refresh,
            LoadParams::Append { .. } => LoadType::Append,
        }
    }

    pub fn key(&self) -> Option<&K> {
        match self {
            LoadParams::Refresh { key, .. } => key.as_ref(),
            LoadParams::Append { key, .. } => Some(key),
        }
    }

    pub fn load_size(&self) -> usize {
        match self {
            LoadParams::Refresh { load_size, .. } | LoadParams::Append { load_size, .. } => *load_size,
        }
    }
}

/// Outcome of one load. `next_key == None` signals the end of pagination.
#[derive(Clone, Debug, PartialEq)]
pub enum LoadResult<K, T> {
    Success { data: Vec<T>, next_key: Option<K> },
    Failure(LoadError),
}

impl<K, T> LoadResult<K, T> {
    pub fn success(data: Vec<T>, next_key: Option<K>) -> Self {
        LoadResult::Success { data, next_key }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        LoadResult::Failure(LoadError::new(message))
    }
}

/// A data-source failure, carried inside [`LoadState::Failure`].
///
/// Equality compares messages only.
#[derive(Clone)]
pub struct LoadError {
    message: String,
    source: Option<Arc<dyn Error + Send + Sync>>,
}

impl LoadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an error raised by the data source.
    pub fn from_error<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }

    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self::new(format!("load panicked: {}", panic_message(payload)))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadError")
            .field("message", &self.message)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for LoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

impl PartialEq for LoadError {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

/// Events emitted by a pager, in order, per load:
/// `LoadStateUpdate` then `LoadDataSuccess` then `ListStateUpdate`.
#[derive(Clone, Debug, PartialEq)]
pub enum PagingEvent<T> {
    /// A load-state transition.
    LoadStateUpdate { load_type: LoadType, states: LoadStates },
    /// A load returned data.
    LoadDataSuccess {
        data: Vec<T>,
        load_type: LoadType,
        states: LoadStates,
    },
    /// A list mutation to apply.
    ListStateUpdate { op: UpdateOp<T>, states: LoadStates },
}

impl<T> PagingEvent<T> {
    /// The load states snapshot carried by every event.
    pub fn states(&self) -> &LoadStates {
        match self {
            PagingEvent::LoadStateUpdate { states, .. }
            | PagingEvent::LoadDataSuccess { states, .. }
            | PagingEvent::ListStateUpdate { states, .. } => states,
        }
    }
}
