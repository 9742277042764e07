//! The load-state machine.
//!
//! Pure bookkeeping: it decides which loads to issue and how their outcomes
//! change [`LoadStates`], and rejects results from loads it no longer
//! considers active. Executing loads is the pager's job.

use super::source::PagingConfig;
use super::types::{LoadError, LoadParams, LoadState, LoadStates, LoadType};

/// A load the machine has marked `Loading` and expects an outcome for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadRequest<K> {
    pub generation: u64,
    pub params: LoadParams<K>,
}

impl<K> LoadRequest<K> {
    pub fn load_type(&self) -> LoadType {
        self.params.load_type()
    }
}

#[derive(Debug)]
pub struct LoadStateMachine<K> {
    states: LoadStates,
    initial_key: Option<K>,
    next_key: Option<K>,
    initial_load_size: usize,
    page_size: usize,
    generation: u64,
    active_refresh: Option<LoadRequest<K>>,
    active_append: Option<LoadRequest<K>>,
    failed_refresh: Option<LoadParams<K>>,
    failed_append: Option<LoadParams<K>>,
    last_failed: Option<LoadType>,
}

impl<K> LoadStateMachine<K> {
    /// Deactivate every load without touching states.
    pub fn cancel_all(&mut self) {
        self.active_refresh = None;
        self.active_append = None;
    }
}

impl<K: Clone> LoadStateMachine<K> {
    pub fn new(initial_key: Option<K>, config: &PagingConfig) -> Self {
        Self {
            states: LoadStates::default(),
            initial_key,
            next_key: None,
            initial_load_size: config.initial_load_size,
            page_size: config.page_size,
            generation: 0,
            active_refresh: None,
            active_append: None,
            failed_refresh: None,
            failed_append: None,
            last_failed: None,
        }
    }

    pub fn states(&self) -> &LoadStates {
        &self.states
    }

    /// Key returned by the last successful load.
    pub fn next_key(&self) -> Option<&K> {
        self.next_key.as_ref()
    }

    /// Whether an outcome for `generation` would still be accepted.
    pub fn is_active(&self, generation: u64) -> bool {
        self.slot_of(generation).is_some()
    }

    // --- Issuing loads ---

    /// Start a refresh from the initial key. Always allowed.
    ///
    /// Any active refresh or append stops being active; their outcomes are
    /// ignored from here on.
    pub fn refresh(&mut self) -> LoadRequest<K> {
        self.active_append = None;
        self.next_key = None;
        self.failed_refresh = None;
        self.failed_append = None;
        self.last_failed = None;
        self.states.append = LoadState::Incomplete;

        let params = LoadParams::Refresh {
            key: self.initial_key.clone(),
            load_size: self.initial_load_size,
        };
        self.issue(params)
    }

    /// Start an append, unless one is loading, pagination has ended, the
    /// last append failed, or no refresh has succeeded yet.
    ///
    /// `key_for` maps the stored next key to the key actually used; `None`
    /// turns the call into a no-op.
    pub fn append<F>(&mut self, key_for: F) -> Option<LoadRequest<K>>
    where
        F: FnOnce(Option<&K>) -> Option<K>,
    {
        if !matches!(self.states.refresh, LoadState::Success { .. }) {
            return None;
        }
        match self.states.append {
            LoadState::Loading
            | LoadState::Failure(_)
            | LoadState::Success {
                end_of_pagination_reached: true,
            } => return None,
            LoadState::Incomplete
            | LoadState::Success {
                end_of_pagination_reached: false,
            } => {}
        }

        let key = key_for(self.next_key.as_ref())?;
        let params = LoadParams::Append {
            key,
            load_size: self.page_size,
        };
        Some(self.issue(params))
    }

    /// Re-issue the params of the most recent failure, if that load type is
    /// still failed.
    pub fn retry(&mut self) -> Option<LoadRequest<K>> {
        let load_type = self.last_failed?;
        if !self.states.get(load_type).is_failure() {
            return None;
        }
        let params = match load_type {
            LoadType::Refresh => self.failed_refresh.take()?,
            LoadType::Append => self.failed_append.take()?,
        };
        self.last_failed = None;
        Some(self.issue(params))
    }

    fn issue(&mut self, params: LoadParams<K>) -> LoadRequest<K> {
        self.generation += 1;
        let load_type = params.load_type();
        let request = LoadRequest {
            generation: self.generation,
            params,
        };

        self.states.set(load_type, LoadState::Loading);
        match load_type {
            LoadType::Refresh => self.active_refresh = Some(request.clone()),
            LoadType::Append => self.active_append = Some(request.clone()),
        }
        request
    }

    // --- Outcomes ---

    /// Record a successful load. Returns the load type, or `None` if the
    /// load is no longer active.
    pub fn succeed(&mut self, generation: u64, next_key: Option<K>) -> Option<LoadType> {
        let load_type = self.finish(generation)?.load_type();
        let end_of_pagination_reached = next_key.is_none();

        self.states.set(
            load_type,
            LoadState::Success {
                end_of_pagination_reached,
            },
        );
        if load_type == LoadType::Refresh && end_of_pagination_reached {
            self.states.append = LoadState::Success {
                end_of_pagination_reached: true,
            };
        }
        self.next_key = next_key;
        Some(load_type)
    }

    /// Record a failed load. Returns the load type, or `None` if the load is
    /// no longer active.
    pub fn fail(&mut self, generation: u64, error: LoadError) -> Option<LoadType> {
        let request = self.finish(generation)?;
        let load_type = request.load_type();

        self.states.set(load_type, LoadState::Failure(error));
        match load_type {
            LoadType::Refresh => self.failed_refresh = Some(request.params),
            LoadType::Append => self.failed_append = Some(request.params),
        }
        self.last_failed = Some(load_type);
        Some(load_type)
    }

    /// Record a load cancelled by its caller; the load type returns to
    /// `Incomplete`.
    pub fn abandon(&mut self, generation: u64) -> Option<LoadType> {
        let load_type = self.finish(generation)?.load_type();
        self.states.set(load_type, LoadState::Incomplete);
        Some(load_type)
    }

    fn finish(&mut self, generation: u64) -> Option<LoadRequest<K>> {
        match self.slot_of(generation)? {
            LoadType::Refresh => self.active_refresh.take(),
            LoadType::Append => self.active_append.take(),
        }
    }

    fn slot_of(&self, generation: u64) -> Option<LoadType> {
        let matches = |slot: &Option<LoadRequest<K>>| {
            slot.as_ref()
                .is_some_and(|request| request.generation == generation)
        };
        if matches(&self.active_refresh) {
            Some(LoadType::Refresh)
        } else if matches(&self.active_append) {
            Some(LoadType::Append)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> LoadStateMachine<u32> {
        LoadStateMachine::new(Some(0), &PagingConfig::new(10))
    }

    fn refreshed(next_key: Option<u32>) -> LoadStateMachine<u32> {
        let mut machine = machine();
        let request = machine.refresh();
        machine.succeed(request.generation, next_key).unwrap();
        machine
    }

    fn stored(key: Option<&u32>) -> Option<u32> {
        key.copied()
    }

    #[test]
    fn test_refresh_resets_states() {
        let mut machine = refreshed(Some(10));
        let append = machine.append(stored).unwrap();
        machine.fail(append.generation, LoadError::new("offline"));

        let request = machine.refresh();
        assert_eq!(
            request.params,
            LoadParams::Refresh {
                key: Some(0),
                load_size: 10
            }
        );
        assert_eq!(machine.states().refresh, LoadState::Loading);
        assert_eq!(machine.states().append, LoadState::Incomplete);
        assert!(machine.retry().is_none());
    }

    #[test]
    fn test_append_requires_successful_refresh() {
        let mut machine = machine();
        assert!(machine.append(stored).is_none());

        machine.refresh();
        assert!(machine.append(stored).is_none());
        assert_eq!(machine.states().append, LoadState::Incomplete);
    }

    #[test]
    fn test_second_append_while_loading_is_noop() {
        let mut machine = refreshed(Some(10));

        let first = machine.append(stored).unwrap();
        assert_eq!(
            first.params,
            LoadParams::Append {
                key: 10,
                load_size: 10
            }
        );
        assert!(machine.append(stored).is_none());
        assert_eq!(machine.states().append, LoadState::Loading);
    }

    #[test]
    fn test_end_of_pagination_is_terminal_for_append() {
        let mut machine = refreshed(Some(10));
        let append = machine.append(stored).unwrap();
        machine.succeed(append.generation, None);

        assert!(machine.states().append.end_of_pagination_reached());
        assert!(machine.append(stored).is_none());
    }

    #[test]
    fn test_refresh_without_next_key_ends_append() {
        let machine = refreshed(None);
        assert!(machine.states().refresh.end_of_pagination_reached());
        assert!(machine.states().append.end_of_pagination_reached());
    }

    #[test]
    fn test_retry_reissues_failed_params() {
        let mut machine = refreshed(Some(20));
        let append = machine.append(stored).unwrap();
        machine.fail(append.generation, LoadError::new("offline"));

        assert!(machine.append(stored).is_none());
        let retried = machine.retry().unwrap();
        assert_eq!(retried.params, append.params);
        assert_ne!(retried.generation, append.generation);

        machine.succeed(retried.generation, Some(30));
        assert_eq!(
            machine.states().append,
            LoadState::Success {
                end_of_pagination_reached: false
            }
        );
        assert!(machine.retry().is_none());
    }

    #[test]
    fn test_retry_without_failure_is_noop() {
        let mut machine = refreshed(Some(10));
        assert!(machine.retry().is_none());
    }

    #[test]
    fn test_stale_outcome_ignored() {
        let mut machine = machine();
        let first = machine.refresh();
        let second = machine.refresh();

        assert!(!machine.is_active(first.generation));
        assert_eq!(machine.succeed(first.generation, Some(5)), None);
        assert_eq!(machine.states().refresh, LoadState::Loading);

        assert_eq!(
            machine.succeed(second.generation, Some(5)),
            Some(LoadType::Refresh)
        );
    }

    #[test]
    fn test_refresh_deactivates_append() {
        let mut machine = refreshed(Some(10));
        let append = machine.append(stored).unwrap();
        machine.refresh();

        assert_eq!(machine.succeed(append.generation, Some(20)), None);
        assert_eq!(machine.states().append, LoadState::Incomplete);
    }

    #[test]
    fn test_abandon_returns_to_incomplete() {
        let mut machine = refreshed(Some(10));
        let append = machine.append(stored).unwrap();

        assert_eq!(machine.abandon(append.generation), Some(LoadType::Append));
        assert_eq!(machine.states().append, LoadState::Incomplete);
        assert!(machine.append(stored).is_some());
    }

    #[test]
    fn test_append_key_override() {
        let mut machine = refreshed(Some(10));
        let request = machine.append(|_| Some(42)).unwrap();
        assert_eq!(request.params.key(), Some(&42));
    }
}
