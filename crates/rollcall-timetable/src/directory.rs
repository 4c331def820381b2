use std::sync::{Mutex, PoisonError};

use rollcall_core::collab::{Assignment, AssignmentSource, RosterSource};
use rollcall_core::{ParticipantId, RollcallError, UnitId};
use rusqlite::Connection;
use tracing::warn;

use crate::db::init_directory;

/// Read-only view of the roster and assignment tables that the surrounding
/// product writes.
pub struct SqliteDirectory {
    db: Mutex<Connection>,
}

impl SqliteDirectory {
    pub fn new(conn: Connection) -> crate::error::Result<Self> {
        init_directory(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn query<T>(
        &self,
        collaborator: &'static str,
        sql: &str,
        unit: &UnitId,
        map: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> rollcall_core::Result<Vec<T>> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        let unavailable = |e: rusqlite::Error| {
            warn!(collaborator, error = %e, "directory lookup failed");
            RollcallError::Collaborator {
                collaborator,
                reason: e.to_string(),
            }
        };
        let mut stmt = db.prepare_cached(sql).map_err(unavailable)?;
        let rows = stmt.query_map([unit.as_str()], map).map_err(unavailable)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(unavailable)
    }
}

impl RosterSource for SqliteDirectory {
    fn list_participants(&self, unit: &UnitId) -> rollcall_core::Result<Vec<ParticipantId>> {
        self.query(
            "roster",
            "SELECT participant_id FROM roster_members WHERE unit_id = ?1 ORDER BY participant_id",
            unit,
            |row| Ok(ParticipantId(row.get(0)?)),
        )
    }
}

impl AssignmentSource for SqliteDirectory {
    fn list_assignments(&self, unit: &UnitId) -> rollcall_core::Result<Vec<Assignment>> {
        self.query(
            "assignments",
            "SELECT subject, responsible_party FROM subject_assignments
             WHERE unit_id = ?1 ORDER BY subject, responsible_party",
            unit,
            |row| {
                Ok(Assignment {
                    subject: row.get(0)?,
                    responsible_party: row.get(1)?,
                })
            },
        )
    }
}
