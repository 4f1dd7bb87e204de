use camino::Utf8Path;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::agents::ExternalAgent;
use crate::domain::{FileUse, TransferId};
use crate::error::DataverseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub uuid: Uuid,
    pub transfer_id: TransferId,
    pub originallocation: String,
    pub currentlocation: Option<String>,
    pub filegrpuse: String,
    pub removedtime: Option<String>,
}

impl FileRecord {
    pub fn is_removed(&self) -> bool {
        self.currentlocation.is_none() && self.removedtime.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub event_uuid: Uuid,
    pub file_uuid: Uuid,
    pub event_type: String,
    pub event_datetime: Option<String>,
    pub detail: String,
    pub outcome: String,
    pub outcome_detail_note: String,
    /// Attribute the event to the first external agent, when there is one.
    pub dataverse_agent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDerivation {
    pub source_uuid: Uuid,
    pub derived_uuid: Uuid,
    pub event_uuid: Uuid,
}

/// Every write a reconciliation pass makes, computed up front.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub use_updates: Vec<(Uuid, FileUse)>,
    pub agents: Vec<ExternalAgent>,
    pub events: Vec<NewEvent>,
    pub derivations: Vec<NewDerivation>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CommitSummary {
    pub agents_created: usize,
    pub agents_existing: usize,
    pub dataverse_agent_id: Option<i64>,
}

pub trait FileRecordStore {
    fn transfer_files(&self, transfer: &TransferId) -> Result<Vec<FileRecord>, DataverseError>;

    /// Applies the whole change set or nothing.
    fn commit(&mut self, changes: &ChangeSet) -> Result<CommitSummary, DataverseError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub event_uuid: Uuid,
    pub file_uuid: Uuid,
    pub event_type: String,
    pub detail: String,
    pub outcome: String,
    pub outcome_detail_note: String,
    pub agent_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAgent {
    pub id: i64,
    pub agent: ExternalAgent,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Utf8Path) -> Result<Self, DataverseError> {
        let conn = Connection::open(path.as_std_path())?;
        debug!(path = %path, "opened file record database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, DataverseError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DataverseError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                uuid TEXT PRIMARY KEY,
                transfer_id TEXT NOT NULL,
                originallocation TEXT NOT NULL,
                currentlocation TEXT,
                filegrpuse TEXT NOT NULL DEFAULT 'original',
                removedtime TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_files_transfer ON files(transfer_id);

            CREATE TABLE IF NOT EXISTS agents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identifiertype TEXT NOT NULL,
                identifiervalue TEXT NOT NULL,
                name TEXT NOT NULL,
                agenttype TEXT NOT NULL,
                UNIQUE (identifiertype, identifiervalue, name, agenttype)
            );

            CREATE TABLE IF NOT EXISTS events (
                event_uuid TEXT PRIMARY KEY,
                file_uuid TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_datetime TEXT,
                event_detail TEXT NOT NULL,
                event_outcome TEXT NOT NULL,
                event_outcome_detail TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS event_agents (
                event_uuid TEXT NOT NULL,
                agent_id INTEGER NOT NULL,
                PRIMARY KEY (event_uuid, agent_id)
            );

            CREATE TABLE IF NOT EXISTS derivations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_file_uuid TEXT NOT NULL,
                derived_file_uuid TEXT NOT NULL,
                event_uuid TEXT
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    pub fn insert_file(&self, record: &FileRecord) -> Result<(), DataverseError> {
        self.conn.execute(
            "INSERT INTO files (uuid, transfer_id, originallocation, currentlocation, filegrpuse, removedtime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.uuid.to_string(),
                record.transfer_id.to_string(),
                record.originallocation,
                record.currentlocation,
                record.filegrpuse,
                record.removedtime,
            ],
        )?;
        Ok(())
    }

    pub fn file(&self, uuid: &Uuid) -> Result<Option<FileRecord>, DataverseError> {
        let record = self
            .conn
            .query_row(
                "SELECT uuid, transfer_id, originallocation, currentlocation, filegrpuse, removedtime
                 FROM files WHERE uuid = ?1",
                params![uuid.to_string()],
                raw_file_row,
            )
            .optional()?;
        record.map(RawFile::into_record).transpose()
    }

    pub fn events_for(&self, file_uuid: &Uuid) -> Result<Vec<StoredEvent>, DataverseError> {
        let mut stmt = self.conn.prepare(
            "SELECT event_uuid, file_uuid, event_type, event_detail, event_outcome, event_outcome_detail
             FROM events WHERE file_uuid = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![file_uuid.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut events = Vec::with_capacity(rows.len());
        for (event_uuid, file_uuid, event_type, detail, outcome, note) in rows {
            let agent_ids = self.event_agents(&event_uuid)?;
            events.push(StoredEvent {
                event_uuid: parse_uuid(&event_uuid)?,
                file_uuid: parse_uuid(&file_uuid)?,
                event_type,
                detail,
                outcome,
                outcome_detail_note: note,
                agent_ids,
            });
        }
        Ok(events)
    }

    pub fn derivations(&self) -> Result<Vec<NewDerivation>, DataverseError> {
        let mut stmt = self.conn.prepare(
            "SELECT source_file_uuid, derived_file_uuid, event_uuid FROM derivations ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(source, derived, event)| {
                Ok(NewDerivation {
                    source_uuid: parse_uuid(&source)?,
                    derived_uuid: parse_uuid(&derived)?,
                    event_uuid: parse_uuid(&event)?,
                })
            })
            .collect()
    }

    pub fn agents(&self) -> Result<Vec<StoredAgent>, DataverseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, identifiertype, identifiervalue, name, agenttype FROM agents ORDER BY id",
        )?;
        let agents = stmt
            .query_map([], |row| {
                Ok(StoredAgent {
                    id: row.get(0)?,
                    agent: ExternalAgent {
                        agent_identifier_type: row.get(1)?,
                        agent_identifier_value: row.get(2)?,
                        agent_name: row.get(3)?,
                        agent_type: row.get(4)?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(agents)
    }

    fn event_agents(&self, event_uuid: &str) -> Result<Vec<i64>, DataverseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT agent_id FROM event_agents WHERE event_uuid = ?1 ORDER BY agent_id")?;
        let ids = stmt
            .query_map(params![event_uuid], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

impl FileRecordStore for SqliteStore {
    fn transfer_files(&self, transfer: &TransferId) -> Result<Vec<FileRecord>, DataverseError> {
        let mut stmt = self.conn.prepare(
            "SELECT uuid, transfer_id, originallocation, currentlocation, filegrpuse, removedtime
             FROM files WHERE transfer_id = ?1 ORDER BY originallocation",
        )?;
        let rows = stmt
            .query_map(params![transfer.to_string()], raw_file_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawFile::into_record).collect()
    }

    fn commit(&mut self, changes: &ChangeSet) -> Result<CommitSummary, DataverseError> {
        let tx = self.conn.transaction()?;
        let mut summary = CommitSummary::default();

        for (uuid, file_use) in &changes.use_updates {
            let updated = tx.execute(
                "UPDATE files SET filegrpuse = ?1 WHERE uuid = ?2",
                params![file_use.as_str(), uuid.to_string()],
            )?;
            if updated != 1 {
                return Err(DataverseError::Database(format!(
                    "file record {uuid} disappeared during reconciliation"
                )));
            }
        }

        for agent in &changes.agents {
            let (id, created) = get_or_create_agent(&tx, agent)?;
            if created {
                summary.agents_created += 1;
                info!(name = %agent.agent_name, "added agent");
            } else {
                summary.agents_existing += 1;
                debug!(name = %agent.agent_name, "agent already exists");
            }
            summary.dataverse_agent_id.get_or_insert(id);
        }

        for event in &changes.events {
            tx.execute(
                "INSERT INTO events (event_uuid, file_uuid, event_type, event_datetime, event_detail,
                                     event_outcome, event_outcome_detail)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.event_uuid.to_string(),
                    event.file_uuid.to_string(),
                    event.event_type,
                    event.event_datetime,
                    event.detail,
                    event.outcome,
                    event.outcome_detail_note,
                ],
            )?;
            if event.dataverse_agent
                && let Some(agent_id) = summary.dataverse_agent_id
            {
                tx.execute(
                    "INSERT INTO event_agents (event_uuid, agent_id) VALUES (?1, ?2)",
                    params![event.event_uuid.to_string(), agent_id],
                )?;
            }
        }

        for derivation in &changes.derivations {
            tx.execute(
                "INSERT INTO derivations (source_file_uuid, derived_file_uuid, event_uuid)
                 VALUES (?1, ?2, ?3)",
                params![
                    derivation.source_uuid.to_string(),
                    derivation.derived_uuid.to_string(),
                    derivation.event_uuid.to_string(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(summary)
    }
}

fn get_or_create_agent(tx: &Transaction<'_>, agent: &ExternalAgent) -> Result<(i64, bool), DataverseError> {
    let existing = tx
        .query_row(
            "SELECT id FROM agents
             WHERE identifiertype = ?1 AND identifiervalue = ?2 AND name = ?3 AND agenttype = ?4",
            params![
                agent.agent_identifier_type,
                agent.agent_identifier_value,
                agent.agent_name,
                agent.agent_type,
            ],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok((id, false));
    }
    tx.execute(
        "INSERT INTO agents (identifiertype, identifiervalue, name, agenttype) VALUES (?1, ?2, ?3, ?4)",
        params![
            agent.agent_identifier_type,
            agent.agent_identifier_value,
            agent.agent_name,
            agent.agent_type,
        ],
    )?;
    Ok((tx.last_insert_rowid(), true))
}

struct RawFile {
    uuid: String,
    transfer_id: String,
    originallocation: String,
    currentlocation: Option<String>,
    filegrpuse: String,
    removedtime: Option<String>,
}

impl RawFile {
    fn into_record(self) -> Result<FileRecord, DataverseError> {
        Ok(FileRecord {
            uuid: parse_uuid(&self.uuid)?,
            transfer_id: TransferId::from(parse_uuid(&self.transfer_id)?),
            originallocation: self.originallocation,
            currentlocation: self.currentlocation,
            filegrpuse: self.filegrpuse,
            removedtime: self.removedtime,
        })
    }
}

fn raw_file_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawFile> {
    Ok(RawFile {
        uuid: row.get(0)?,
        transfer_id: row.get(1)?,
        originallocation: row.get(2)?,
        currentlocation: row.get(3)?,
        filegrpuse: row.get(4)?,
        removedtime: row.get(5)?,
    })
}

fn parse_uuid(value: &str) -> Result<Uuid, DataverseError> {
    Uuid::parse_str(value)
        .map_err(|_| DataverseError::Database(format!("stored value is not a UUID: {value}")))
}
