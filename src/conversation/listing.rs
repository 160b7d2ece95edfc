//! Session listing types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Which tier(s) a listed session was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    Cache,
    Durable,
    Both,
}

impl SessionSource {
    pub fn merge(self, other: SessionSource) -> SessionSource {
        if self == other { self } else { SessionSource::Both }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub owner_id: String,
    pub last_activity_at: DateTime<Utc>,
    /// Known only when the durable tier listed the session.
    pub created_at: Option<DateTime<Utc>>,
    pub source: SessionSource,
}

/// Sessions whose last activity falls on one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGroup {
    pub day: NaiveDate,
    pub sessions: Vec<SessionSummary>,
}

/// Sort by `last_activity_at` descending (ties by id) and bucket by day.
pub fn group_by_day(mut sessions: Vec<SessionSummary>) -> Vec<SessionGroup> {
    sessions.sort_by(|a, b| {
        b.last_activity_at
            .cmp(&a.last_activity_at)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });

    let mut groups: Vec<SessionGroup> = Vec::new();
    for session in sessions {
        let day = session.last_activity_at.date_naive();
        match groups.last_mut() {
            Some(group) if group.day == day => group.sessions.push(session),
            _ => groups.push(SessionGroup {
                day,
                sessions: vec![session],
            }),
        }
    }
    groups
}
