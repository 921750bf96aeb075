use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::coordinator::state::{Session, SharedState};

/// Session bookkeeping over a borrowed [`SharedState`].
///
/// Expiry is lazy: nothing here runs on a timer. The coordinator sweeps at
/// the start of every operation while it holds the state lock.
pub struct SessionRegistry<'a> {
    state: &'a mut SharedState,
}

impl<'a> SessionRegistry<'a> {
    pub fn new(state: &'a mut SharedState) -> Self {
        Self { state }
    }

    /// Create the session if absent, otherwise refresh its activity time.
    /// A provided username replaces the stored one.
    pub fn touch(
        &mut self,
        session_id: &str,
        username: Option<&str>,
        now: DateTime<Utc>,
    ) -> &Session {
        let session = self
            .state
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id, "Session registered");
                Session::new(session_id, now)
            });
        session.last_active_at = now;
        if let Some(name) = username {
            session.username = Some(name.to_string());
        }
        session
    }

    /// Refresh an existing session without creating one.
    pub fn refresh(&mut self, session_id: &str, now: DateTime<Utc>) -> bool {
        match self.state.sessions.get_mut(session_id) {
            Some(session) => {
                session.last_active_at = now;
                true
            }
            None => false,
        }
    }

    /// Drop every session idle for longer than `timeout` and free the items
    /// they held. Assignments whose session record is gone are freed too.
    pub fn expire_inactive(&mut self, now: DateTime<Utc>, timeout: Duration) -> BTreeSet<usize> {
        let expired: Vec<String> = self
            .state
            .sessions
            .values()
            .filter(|s| is_expired(s, now, timeout))
            .map(|s| s.session_id.clone())
            .collect();

        let mut freed = BTreeSet::new();
        for session_id in expired {
            if let Some(index) = self.remove_session(&session_id) {
                freed.insert(index);
            }
            tracing::info!(session_id = %session_id, "Reclaimed inactive session");
        }

        let orphaned: Vec<usize> = self
            .state
            .assignments
            .iter()
            .filter(|(_, a)| !self.state.sessions.contains_key(&a.session_id))
            .map(|(&i, _)| i)
            .collect();
        for index in orphaned {
            self.state.release_index(index);
            freed.insert(index);
        }

        freed
    }

    /// Explicit release for one session. Same effect as expiry.
    pub fn reset(&mut self, session_id: &str) -> Option<usize> {
        self.remove_session(session_id)
    }

    /// Release the session's item but keep the session registered.
    pub fn release_assignment(&mut self, session_id: &str) -> Option<usize> {
        let index = self
            .state
            .sessions
            .get_mut(session_id)
            .and_then(|s| s.assigned_item_index.take())?;
        if self.state.holder_of(index) == Some(session_id) {
            self.state.release_index(index);
            Some(index)
        } else {
            None
        }
    }

    fn remove_session(&mut self, session_id: &str) -> Option<usize> {
        let released = self.release_assignment(session_id);
        self.state.sessions.remove(session_id);
        released
    }
}

/// Sessions that have been active within `timeout` of `now`.
pub fn active_count(state: &SharedState, now: DateTime<Utc>, timeout: Duration) -> usize {
    state
        .sessions
        .values()
        .filter(|s| !is_expired(s, now, timeout))
        .count()
}

fn is_expired(session: &Session, now: DateTime<Utc>, timeout: Duration) -> bool {
    match now.signed_duration_since(session.last_active_at).to_std() {
        Ok(idle) => idle > timeout,
        // last activity in the future (clock skew): treat as active
        Err(_) => false,
    }
}
