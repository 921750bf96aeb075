use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::catalog::{Item, ItemCatalog};
use crate::config::CoordinatorConfig;
use crate::coordinator::registry::{self, SessionRegistry};
use crate::coordinator::state::{percent, Decision, LeaderboardEntry, Session, SharedState};
use crate::error::{CoordinatorError, Result, StoreError};
use crate::store::{PersistedState, StateBackend};

/// An item bound to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub index: usize,
    pub item: Item,
    /// True when the session already held this item before the call.
    pub resumed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned(Assignment),
    /// Every catalog item is either checked out or completed.
    Exhausted,
}

impl AssignOutcome {
    pub fn assignment(&self) -> Option<&Assignment> {
        match self {
            AssignOutcome::Assigned(a) => Some(a),
            AssignOutcome::Exhausted => None,
        }
    }

    pub fn index(&self) -> Option<usize> {
        self.assignment().map(|a| a.index)
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, AssignOutcome::Exhausted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub index: usize,
    pub decision: Decision,
    pub user_stats: Option<LeaderboardEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub assigned: usize,
    pub liked: usize,
    pub disliked: usize,
    pub completed: usize,
    pub remaining: usize,
    pub active_sessions: usize,
    pub percent_complete: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardRow {
    pub username: String,
    pub reviews: u64,
    pub liked: u64,
    pub disliked: u64,
    pub like_rate: f64,
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminStats {
    #[serde(flatten)]
    pub progress: Progress,
    pub global_cursor: usize,
    pub revision: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub sessions: Vec<String>,
}

/// Hands out catalog items to sessions so that no two live sessions ever
/// hold the same item.
///
/// # Critical section
///
/// All reads and mutations of [`SharedState`] happen under one mutex and
/// never await while holding it. A mutating operation takes a snapshot
/// before releasing the lock and persists that snapshot afterwards, so slow
/// storage never blocks other sessions.
///
/// # Persistence ordering
///
/// Snapshots carry a revision. The persist gate serializes writes and drops
/// any snapshot that is not newer than the last one written, so a delayed
/// writer cannot roll storage back.
///
/// # Failure
///
/// The in-memory state is authoritative for the life of the process. If the
/// local write fails the operation reports [`CoordinatorError::Persist`],
/// but the in-memory transition stands; for `assign` a retry returns the
/// same item.
pub struct Coordinator {
    catalog: Arc<ItemCatalog>,
    config: CoordinatorConfig,
    state: Mutex<SharedState>,
    store: Arc<dyn StateBackend>,
    persisted_revision: Mutex<u64>,
}

impl Coordinator {
    pub fn new(
        catalog: Arc<ItemCatalog>,
        store: Arc<dyn StateBackend>,
        config: CoordinatorConfig,
        state: SharedState,
    ) -> Self {
        let revision = state.revision;
        Self {
            catalog,
            config,
            state: Mutex::new(state),
            store,
            persisted_revision: Mutex::new(revision),
        }
    }

    /// Restore the latest state from `store`, or start fresh if nothing is
    /// recoverable.
    pub async fn open(
        catalog: Arc<ItemCatalog>,
        store: Arc<dyn StateBackend>,
        config: CoordinatorConfig,
    ) -> Self {
        let state = match store.load().await {
            Ok(Some(persisted)) => {
                let state = persisted.shared_state;
                tracing::info!(
                    revision = state.revision,
                    cursor = state.global_cursor,
                    assigned = state.assignments.len(),
                    liked = state.completed.liked.len(),
                    disliked = state.completed.disliked.len(),
                    "Restored shared state"
                );
                state
            }
            Ok(None) => {
                tracing::info!("No saved state found, starting fresh");
                SharedState::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load saved state, starting fresh");
                SharedState::new()
            }
        };
        Self::new(catalog, store, config, state)
    }

    pub fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Return the session's outstanding item, or bind the lowest free one.
    pub async fn assign(&self, session_id: &str, username: Option<&str>) -> Result<AssignOutcome> {
        let now = Utc::now();
        let total = self.catalog.size();

        let (outcome, snapshot) = {
            let mut state = self.state.lock().await;
            self.sweep(&mut state, now);
            SessionRegistry::new(&mut state).touch(session_id, username, now);

            let outcome = match self.outstanding(&mut state, session_id) {
                Some(index) => {
                    tracing::debug!(session_id, index, "Returning existing assignment");
                    self.assigned(index, true)?
                }
                None => match state.next_free_index(total) {
                    Some(index) => {
                        state.take_index(index, session_id, now);
                        tracing::info!(session_id, index, "Item assigned");
                        self.assigned(index, false)?
                    }
                    None => {
                        tracing::info!(session_id, "No items left to assign");
                        AssignOutcome::Exhausted
                    }
                },
            };

            state.mark_updated(now);
            (outcome, state.clone())
        };

        self.persist(snapshot).await?;
        Ok(outcome)
    }

    /// Record a decision for whatever item the session currently holds.
    pub async fn complete(&self, session_id: &str, decision: Decision) -> Result<Completion> {
        self.complete_inner(session_id, None, decision).await
    }

    /// Like [`complete`](Self::complete), but fails without changing anything
    /// if the session does not hold `index`.
    pub async fn complete_item(
        &self,
        session_id: &str,
        index: usize,
        decision: Decision,
    ) -> Result<Completion> {
        self.complete_inner(session_id, Some(index), decision).await
    }

    async fn complete_inner(
        &self,
        session_id: &str,
        expected: Option<usize>,
        decision: Decision,
    ) -> Result<Completion> {
        let now = Utc::now();

        let (result, snapshot) = {
            let mut state = self.state.lock().await;
            let before = state.revision;
            let swept = self.sweep(&mut state, now);
            SessionRegistry::new(&mut state).refresh(session_id, now);

            let result = match (self.outstanding(&mut state, session_id), expected) {
                (None, _) => Err(CoordinatorError::NoActiveAssignment(session_id.to_string())),
                (Some(actual), Some(expected)) if actual != expected => {
                    Err(CoordinatorError::AssignmentMismatch {
                        expected,
                        actual: Some(actual),
                    })
                }
                (Some(index), _) => {
                    state.assignments.remove(&index);
                    state.completed.insert(index, decision);

                    let username = state.sessions.get_mut(session_id).and_then(|s| {
                        s.assigned_item_index = None;
                        s.username.clone()
                    });
                    let user_stats = username.map(|name| {
                        let entry = state
                            .leaderboard
                            .entry(name)
                            .or_insert_with(|| LeaderboardEntry::new(now));
                        entry.record(decision, now);
                        entry.clone()
                    });

                    state.mark_updated(now);
                    tracing::info!(session_id, index, decision = %decision, "Item completed");
                    Ok(Completion {
                        index,
                        decision,
                        user_stats,
                    })
                }
            };

            if result.is_err() && swept > 0 {
                state.mark_updated(now);
            }
            let snapshot = (state.revision != before).then(|| state.clone());
            (result, snapshot)
        };

        if let Some(snapshot) = snapshot {
            self.persist(snapshot).await?;
        }
        result
    }

    /// Set the session's display name and make sure it has a leaderboard row.
    pub async fn register(&self, session_id: &str, username: &str) -> Result<LeaderboardEntry> {
        let name: String = username
            .trim()
            .chars()
            .take(self.config.max_username_len)
            .collect();
        if name.is_empty() {
            return Err(CoordinatorError::InvalidUsername);
        }
        let now = Utc::now();

        let (entry, snapshot) = {
            let mut state = self.state.lock().await;
            self.sweep(&mut state, now);
            SessionRegistry::new(&mut state).touch(session_id, Some(&name), now);
            let entry = state
                .leaderboard
                .entry(name.clone())
                .or_insert_with(|| LeaderboardEntry::new(now));
            entry.last_active = now;
            let entry = entry.clone();
            state.mark_updated(now);
            (entry, state.clone())
        };

        tracing::info!(session_id, username = %name, "Username set");
        self.persist(snapshot).await?;
        Ok(entry)
    }

    /// User-initiated restart: free the session's item and forget the session.
    pub async fn release(&self, session_id: &str) -> Result<Option<usize>> {
        let now = Utc::now();
        let (released, snapshot) = {
            let mut state = self.state.lock().await;
            self.sweep(&mut state, now);
            let released = SessionRegistry::new(&mut state).reset(session_id);
            state.mark_updated(now);
            (released, state.clone())
        };

        tracing::info!(session_id, released = ?released, "Session reset");
        self.persist(snapshot).await?;
        Ok(released)
    }

    /// Clear all progress. Sessions and their usernames survive, but lose
    /// their assignments.
    pub async fn reset_all(&self) -> Result<()> {
        let now = Utc::now();
        let snapshot = {
            let mut state = self.state.lock().await;
            state.global_cursor = 0;
            state.assignments.clear();
            state.completed = Default::default();
            state.released.clear();
            state.leaderboard.clear();
            for session in state.sessions.values_mut() {
                session.assigned_item_index = None;
            }
            state.mark_updated(now);
            state.clone()
        };

        tracing::warn!("All progress reset");
        self.persist(snapshot).await?;
        Ok(())
    }

    /// Aggregate counts. Does not sweep or mutate.
    pub async fn progress(&self) -> Progress {
        let state = self.state.lock().await;
        self.progress_of(&state, Utc::now())
    }

    /// Leaderboard sorted by review count, most first.
    pub async fn leaderboard(&self) -> Vec<LeaderboardRow> {
        let state = self.state.lock().await;
        let mut rows: Vec<LeaderboardRow> = state
            .leaderboard
            .iter()
            .map(|(name, entry)| LeaderboardRow {
                username: name.clone(),
                reviews: entry.reviews,
                liked: entry.liked,
                disliked: entry.disliked,
                like_rate: entry.like_rate(),
                last_active: entry.last_active,
            })
            .collect();
        rows.sort_by(|a, b| b.reviews.cmp(&a.reviews).then_with(|| a.username.cmp(&b.username)));
        rows
    }

    pub async fn stats(&self) -> AdminStats {
        let state = self.state.lock().await;
        AdminStats {
            progress: self.progress_of(&state, Utc::now()),
            global_cursor: state.global_cursor,
            revision: state.revision,
            last_updated: state.last_updated,
            sessions: state.sessions.keys().cloned().collect(),
        }
    }

    /// Completed items for `decision`, resolved against the catalog in
    /// catalog order.
    pub async fn completed(&self, decision: Decision) -> Vec<Item> {
        let state = self.state.lock().await;
        state
            .completed
            .get(decision)
            .iter()
            .filter_map(|&i| self.catalog.get(i).cloned())
            .collect()
    }

    pub async fn session(&self, session_id: &str) -> Option<Session> {
        self.state.lock().await.sessions.get(session_id).cloned()
    }

    pub async fn leaderboard_entry(&self, username: &str) -> Option<LeaderboardEntry> {
        self.state.lock().await.leaderboard.get(username).cloned()
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> SharedState {
        self.state.lock().await.clone()
    }

    /// Persist the current state and wait for deferred writes. Called once
    /// at shutdown.
    pub async fn flush(&self) -> std::result::Result<(), StoreError> {
        let snapshot = self.snapshot().await;
        {
            let mut persisted = self.persisted_revision.lock().await;
            if snapshot.revision > *persisted {
                self.store.save(&PersistedState::new(snapshot.clone())).await?;
                *persisted = snapshot.revision;
            }
        }
        self.store.flush().await
    }

    fn sweep(&self, state: &mut SharedState, now: DateTime<Utc>) -> usize {
        let freed = SessionRegistry::new(state).expire_inactive(now, self.config.session_timeout);
        if !freed.is_empty() {
            tracing::info!(freed = ?freed, "Expired sessions released items");
            state.mark_updated(now);
        }
        freed.len()
    }

    /// The item the session holds, if the assignment table agrees. Clears
    /// a stale pointer on the session otherwise, and drops an assignment
    /// that points past the end of the catalog.
    fn outstanding(&self, state: &mut SharedState, session_id: &str) -> Option<usize> {
        let index = state.sessions.get(session_id)?.assigned_item_index?;
        let held = state.holder_of(index) == Some(session_id);
        if held && index < self.catalog.size() {
            return Some(index);
        }
        if held {
            // out of range: never goes back into the free pool
            tracing::warn!(session_id, index, "Dropping assignment outside the catalog");
            state.assignments.remove(&index);
        }
        if let Some(session) = state.sessions.get_mut(session_id) {
            session.assigned_item_index = None;
        }
        None
    }

    fn assigned(&self, index: usize, resumed: bool) -> Result<AssignOutcome> {
        let item = self
            .catalog
            .get(index)
            .cloned()
            .ok_or(CoordinatorError::UnknownItem(index))?;
        Ok(AssignOutcome::Assigned(Assignment {
            index,
            item,
            resumed,
        }))
    }

    fn progress_of(&self, state: &SharedState, now: DateTime<Utc>) -> Progress {
        let total = self.catalog.size();
        let assigned = state.assignments.len();
        let liked = state.completed.liked.len();
        let disliked = state.completed.disliked.len();
        let completed = liked + disliked;
        let active_sessions = registry::active_count(state, now, self.config.session_timeout);

        Progress {
            total,
            assigned,
            liked,
            disliked,
            completed,
            remaining: total.saturating_sub(assigned + completed),
            active_sessions,
            percent_complete: percent(completed, total),
        }
    }

    async fn persist(&self, snapshot: SharedState) -> std::result::Result<(), StoreError> {
        let mut persisted = self.persisted_revision.lock().await;
        if snapshot.revision <= *persisted {
            tracing::debug!(
                revision = snapshot.revision,
                persisted = *persisted,
                "Skipping stale snapshot"
            );
            return Ok(());
        }
        let revision = snapshot.revision;
        // remote-tier failures never surface here; TieredStore absorbs them
        if let Err(e) = self.store.save(&PersistedState::new(snapshot)).await {
            tracing::error!(revision, error = %e, "Failed to persist state");
            return Err(e);
        }
        *persisted = revision;
        Ok(())
    }
}
