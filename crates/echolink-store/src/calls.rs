//! CRUD operations for [`CallRecord`] rows (the call history).

use rusqlite::params;

use echolink_shared::types::{CallState, CallType, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::CallRecord;
use crate::sql;

impl Database {
    /// Record a terminal call session.
    pub fn insert_call_record(&self, record: &CallRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO call_history
                 (id, caller, callee, call_type, state, started_at,
                  answered_at, ended_at, duration_secs, ended_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id.to_string(),
                record.caller.as_str(),
                record.callee.as_str(),
                record.call_type.as_str(),
                record.state.as_str(),
                record.started_at.to_rfc3339(),
                record.answered_at.map(|t| t.to_rfc3339()),
                record.ended_at.map(|t| t.to_rfc3339()),
                record.duration_secs,
                record.ended_by,
            ],
        )?;
        Ok(())
    }

    /// Call history naming `user` as either party, most recent first.
    pub fn call_history_for(&self, user: &UserId, limit: u32) -> Result<Vec<CallRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, caller, callee, call_type, state, started_at,
                    answered_at, ended_at, duration_secs, ended_by
             FROM call_history
             WHERE caller = ?1 OR callee = ?1
             ORDER BY started_at DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![user.as_str(), limit], row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

/// Map a `rusqlite::Row` to a [`CallRecord`].
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallRecord> {
    let id_str: String = row.get(0)?;
    let caller: String = row.get(1)?;
    let callee: String = row.get(2)?;
    let call_type_str: String = row.get(3)?;
    let state_str: String = row.get(4)?;
    let started_str: String = row.get(5)?;
    let answered_str: Option<String> = row.get(6)?;
    let ended_str: Option<String> = row.get(7)?;
    let duration_secs: Option<i64> = row.get(8)?;
    let ended_by: Option<String> = row.get(9)?;

    Ok(CallRecord {
        id: sql::parse_uuid(0, &id_str)?,
        caller: caller.as_str().into(),
        callee: callee.as_str().into(),
        call_type: sql::parse_enum(3, &call_type_str, CallType::parse)?,
        state: sql::parse_enum(4, &state_str, CallState::parse)?,
        started_at: sql::parse_ts(5, &started_str)?,
        answered_at: sql::parse_opt_ts(6, answered_str)?,
        ended_at: sql::parse_opt_ts(7, ended_str)?,
        duration_secs,
        ended_by,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn record(caller: &str, callee: &str, minutes_ago: i64) -> CallRecord {
        let started_at = Utc::now() - Duration::minutes(minutes_ago);
        CallRecord {
            id: Uuid::new_v4(),
            caller: caller.into(),
            callee: callee.into(),
            call_type: CallType::Voice,
            state: CallState::Ended,
            started_at,
            answered_at: Some(started_at),
            ended_at: Some(started_at + Duration::seconds(30)),
            duration_secs: Some(30),
            ended_by: Some(caller.to_string()),
        }
    }

    #[test]
    fn history_is_most_recent_first_and_covers_both_roles() {
        let db = Database::open_in_memory().unwrap();

        let older = record("a@x.com", "b@x.com", 10);
        let newer = record("c@x.com", "a@x.com", 1);
        let unrelated = record("c@x.com", "d@x.com", 5);
        db.insert_call_record(&older).unwrap();
        db.insert_call_record(&newer).unwrap();
        db.insert_call_record(&unrelated).unwrap();

        let history = db.call_history_for(&"a@x.com".into(), 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, newer.id);
        assert_eq!(history[1].id, older.id);
    }

    #[test]
    fn history_respects_limit() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..5 {
            db.insert_call_record(&record("a@x.com", "b@x.com", i)).unwrap();
        }

        let history = db.call_history_for(&"a@x.com".into(), 3).unwrap();
        assert_eq!(history.len(), 3);
    }
}
