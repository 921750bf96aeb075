use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal classification of a reviewed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Liked,
    Disliked,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Liked => write!(f, "liked"),
            Decision::Disliked => write!(f, "disliked"),
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "liked" => Ok(Decision::Liked),
            "disliked" => Ok(Decision::Disliked),
            other => Err(format!("unknown decision `{}`", other)),
        }
    }
}

impl From<bool> for Decision {
    fn from(liked: bool) -> Self {
        if liked {
            Decision::Liked
        } else {
            Decision::Disliked
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub username: Option<String>,
    pub assigned_item_index: Option<usize>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            username: None,
            assigned_item_index: None,
            last_active_at: now,
        }
    }
}

/// Value side of the assignment table: who holds an item and since when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentEntry {
    pub session_id: String,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedSet {
    pub liked: BTreeSet<usize>,
    pub disliked: BTreeSet<usize>,
}

impl CompletedSet {
    pub fn contains(&self, index: usize) -> bool {
        self.liked.contains(&index) || self.disliked.contains(&index)
    }

    pub fn get(&self, decision: Decision) -> &BTreeSet<usize> {
        match decision {
            Decision::Liked => &self.liked,
            Decision::Disliked => &self.disliked,
        }
    }

    pub fn insert(&mut self, index: usize, decision: Decision) {
        match decision {
            Decision::Liked => self.liked.insert(index),
            Decision::Disliked => self.disliked.insert(index),
        };
    }

    /// Liked and disliked together.
    pub fn count(&self) -> usize {
        self.liked.len() + self.disliked.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub reviews: u64,
    pub liked: u64,
    pub disliked: u64,
    pub last_active: DateTime<Utc>,
}

impl LeaderboardEntry {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            reviews: 0,
            liked: 0,
            disliked: 0,
            last_active: now,
        }
    }

    pub fn record(&mut self, decision: Decision, now: DateTime<Utc>) {
        self.reviews += 1;
        match decision {
            Decision::Liked => self.liked += 1,
            Decision::Disliked => self.disliked += 1,
        }
        self.last_active = now;
    }

    /// Share of liked reviews, as a percentage rounded to one decimal.
    pub fn like_rate(&self) -> f64 {
        percent(self.liked as usize, self.reviews as usize)
    }
}

/// The unit of persistence. Owned by the coordinator; everything else only
/// ever sees snapshot copies.
///
/// # Invariants
///
/// - An index appears at most once across `assignments`, `completed.liked`,
///   `completed.disliked` and `released`.
/// - Every index in `released` is below `global_cursor`.
/// - Indices at or above `global_cursor` have never been handed out, so
///   `assigned + completed + released + (total - cursor) == total`.
/// - `revision` grows by one with every durable mutation and never resets,
///   not even on `reset_all`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    pub global_cursor: usize,
    pub assignments: BTreeMap<usize, AssignmentEntry>,
    pub completed: CompletedSet,
    /// Indices below the cursor that were handed out and then reclaimed.
    #[serde(default)]
    pub released: BTreeSet<usize>,
    pub sessions: BTreeMap<String, Session>,
    pub leaderboard: BTreeMap<String, LeaderboardEntry>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revision: u64,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            global_cursor: 0,
            assignments: BTreeMap::new(),
            completed: CompletedSet::default(),
            released: BTreeSet::new(),
            sessions: BTreeMap::new(),
            leaderboard: BTreeMap::new(),
            last_updated: None,
            revision: 0,
        }
    }

    /// Record a durable mutation.
    pub fn mark_updated(&mut self, now: DateTime<Utc>) {
        self.revision += 1;
        self.last_updated = Some(now);
    }

    pub fn holder_of(&self, index: usize) -> Option<&str> {
        self.assignments.get(&index).map(|a| a.session_id.as_str())
    }

    pub fn is_taken(&self, index: usize) -> bool {
        self.assignments.contains_key(&index) || self.completed.contains(index)
    }

    /// Return an item to the free pool.
    pub fn release_index(&mut self, index: usize) {
        self.assignments.remove(&index);
        if index < self.global_cursor && !self.completed.contains(index) {
            self.released.insert(index);
        }
    }

    /// Take the lowest free index below `total`, marking nothing.
    pub(crate) fn next_free_index(&mut self, total: usize) -> Option<usize> {
        while let Some(&lowest) = self.released.first() {
            if lowest < total && !self.is_taken(lowest) {
                return Some(lowest);
            }
            self.released.remove(&lowest);
        }
        while self.global_cursor < total {
            let candidate = self.global_cursor;
            if !self.is_taken(candidate) {
                return Some(candidate);
            }
            self.global_cursor += 1;
        }
        None
    }

    /// Bind `index` to `session_id`, advancing the cursor if the index sat
    /// exactly at it.
    pub(crate) fn take_index(&mut self, index: usize, session_id: &str, now: DateTime<Utc>) {
        self.released.remove(&index);
        self.assignments.insert(
            index,
            AssignmentEntry {
                session_id: session_id.to_string(),
                assigned_at: now,
            },
        );
        if index == self.global_cursor {
            self.global_cursor += 1;
        }
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.assigned_item_index = Some(index);
        }
    }

    /// Check the conservation and disjointness invariants against a catalog
    /// of `total` items.
    pub fn check_invariants(&self, total: usize) -> Result<(), String> {
        let liked = &self.completed.liked;
        let disliked = &self.completed.disliked;

        if let Some(i) = liked.intersection(disliked).next() {
            return Err(format!("index {} is both liked and disliked", i));
        }
        for &i in self.assignments.keys() {
            if self.completed.contains(i) {
                return Err(format!("index {} is both assigned and completed", i));
            }
            if self.released.contains(&i) {
                return Err(format!("index {} is both assigned and released", i));
            }
        }
        for &i in &self.released {
            if self.completed.contains(i) {
                return Err(format!("index {} is both released and completed", i));
            }
            if i >= self.global_cursor {
                return Err(format!("released index {} is not below the cursor", i));
            }
        }

        let mut holders: BTreeMap<&str, usize> = BTreeMap::new();
        for (&i, entry) in &self.assignments {
            if let Some(prev) = holders.insert(entry.session_id.as_str(), i) {
                return Err(format!(
                    "session {} holds both {} and {}",
                    entry.session_id, prev, i
                ));
            }
        }

        let cursor = self.global_cursor.min(total);
        let accounted = self.assignments.len()
            + self.completed.count()
            + self.released.len()
            + (total - cursor);
        if accounted != total {
            return Err(format!(
                "conservation violated: accounted {} of {} items",
                accounted, total
            ));
        }
        Ok(())
    }
}

pub(crate) fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    ((part as f64 / whole as f64) * 1000.0).round() / 10.0
}
