// 🗄️ CRM Store - clients / bans / subscribers in SQLite + event log
//
// The import talks to the store only through `CrmStore`, so the committer
// can be driven by a test double. `SqliteStore` holds ONE connection for its
// whole life: begin, every row's savepoint and the final commit all run on it.

use crate::entities::{BanDraft, BanRecord, BanStatus, ClientDraft, ClientRecord, SubscriberDraft, SubscriberRecord};
use crate::error::StoreError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Savepoint wrapped around each import row.
const ROW_SAVEPOINT: &str = "import_row";

// ============================================================================
// EVENTS
// ============================================================================

/// Event for audit trail: one per committed import
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery (in-memory databases report "memory")
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    conn.execute_batch("PRAGMA foreign_keys = ON")?;

    // ==========================================================================
    // Clients
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS clients (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_name TEXT,
            name TEXT NOT NULL,
            contact_person TEXT,
            email TEXT,
            phone TEXT,
            additional_phone TEXT,
            cellular TEXT,
            address TEXT,
            city TEXT,
            zip_code TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // BANs (ban_number is the natural key, compared as typed)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS bans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ban_number TEXT UNIQUE NOT NULL,
            client_id INTEGER NOT NULL REFERENCES clients(id),
            account_type TEXT,
            status TEXT NOT NULL DEFAULT 'A' CHECK (status IN ('A', 'C')),
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Subscribers
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subscribers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ban_id INTEGER NOT NULL REFERENCES bans(id),
            phone TEXT NOT NULL,
            plan TEXT,
            monthly_value REAL NOT NULL DEFAULT 0,
            remaining_payments INTEGER NOT NULL DEFAULT 0,
            contract_term INTEGER NOT NULL DEFAULT 0,
            contract_end_date TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (phone, ban_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bans_client ON bans(client_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subscribers_ban ON subscribers(ban_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type)",
        [],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            event.data.to_string(),
            event.actor,
        ],
    )?;

    Ok(())
}

/// Events of one type, newest first
pub fn get_events_by_type(conn: &Connection, event_type: &str) -> Result<Vec<Event>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE event_type = ?1
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![event_type], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
                    })?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Persistent store as seen by the transactional committer.
///
/// All calls are synchronous; the committer waits for each before moving on.
pub trait CrmStore {
    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;

    /// Open the per-row savepoint inside the current transaction.
    fn savepoint(&mut self) -> Result<(), StoreError>;

    /// Keep the row's writes.
    fn release_savepoint(&mut self) -> Result<(), StoreError>;

    /// Undo the row's writes and close the savepoint.
    fn rollback_to_savepoint(&mut self) -> Result<(), StoreError>;

    fn find_ban_by_number(&mut self, ban_number: &str) -> Result<Option<BanRecord>, StoreError>;

    fn insert_client(&mut self, client: &ClientDraft, name: &str) -> Result<i64, StoreError>;

    fn insert_ban(&mut self, ban_number: &str, client_id: i64, ban: &BanDraft) -> Result<i64, StoreError>;

    fn find_subscriber_by_phone_and_ban(&mut self, phone: &str, ban_id: i64) -> Result<Option<i64>, StoreError>;

    fn insert_subscriber(&mut self, ban_id: i64, phone: &str, subscriber: &SubscriberDraft) -> Result<i64, StoreError>;

    fn record_event(&mut self, event: &Event) -> Result<(), StoreError>;
}

// ============================================================================
// SQLITE STORE
// ============================================================================

/// Row counts, used for reporting and verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub clients: i64,
    pub bans: i64,
    pub subscribers: i64,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database file and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn counts(&self) -> Result<StoreCounts, StoreError> {
        let count = |table: &str| -> Result<i64, StoreError> {
            let sql = format!("SELECT COUNT(*) FROM {}", table);
            Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
        };

        Ok(StoreCounts {
            clients: count("clients")?,
            bans: count("bans")?,
            subscribers: count("subscribers")?,
        })
    }

    pub fn get_client(&self, id: i64) -> Result<Option<ClientRecord>, StoreError> {
        let client = self
            .conn
            .query_row(
                "SELECT id, name, email FROM clients WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ClientRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(client)
    }

    pub fn subscribers_of_ban(&self, ban_id: i64) -> Result<Vec<SubscriberRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ban_id, phone, plan, monthly_value, remaining_payments,
                    contract_term, contract_end_date
             FROM subscribers
             WHERE ban_id = ?1
             ORDER BY id",
        )?;

        let subscribers = stmt
            .query_map(params![ban_id], |row| {
                Ok(SubscriberRecord {
                    id: row.get(0)?,
                    ban_id: row.get(1)?,
                    phone: row.get(2)?,
                    plan: row.get(3)?,
                    monthly_value: row.get(4)?,
                    remaining_payments: row.get(5)?,
                    contract_term: row.get(6)?,
                    contract_end_date: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(subscribers)
    }

    /// Delete one subscriber. A BAN must keep at least one subscriber, so
    /// deleting the last one is refused. Import never goes through here.
    pub fn delete_subscriber(&self, subscriber_id: i64) -> Result<(), StoreError> {
        let (ban_id, ban_number): (i64, String) = self
            .conn
            .query_row(
                "SELECT b.id, b.ban_number
                 FROM subscribers s JOIN bans b ON b.id = s.ban_id
                 WHERE s.id = ?1",
                params![subscriber_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(StoreError::SubscriberNotFound(subscriber_id))?;

        let remaining: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM subscribers WHERE ban_id = ?1",
            params![ban_id],
            |row| row.get(0),
        )?;

        if remaining <= 1 {
            return Err(StoreError::LastSubscriber(ban_number));
        }

        self.conn
            .execute("DELETE FROM subscribers WHERE id = ?1", params![subscriber_id])?;
        log::info!("Deleted subscriber {} from BAN {}", subscriber_id, ban_number);

        Ok(())
    }

    pub fn events_by_type(&self, event_type: &str) -> Result<Vec<Event>, StoreError> {
        get_events_by_type(&self.conn, event_type)
    }
}

impl CrmStore for SqliteStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn savepoint(&mut self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(&format!("SAVEPOINT {}", ROW_SAVEPOINT))?;
        Ok(())
    }

    fn release_savepoint(&mut self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(&format!("RELEASE SAVEPOINT {}", ROW_SAVEPOINT))?;
        Ok(())
    }

    fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}",
            ROW_SAVEPOINT
        ))?;
        Ok(())
    }

    fn find_ban_by_number(&mut self, ban_number: &str) -> Result<Option<BanRecord>, StoreError> {
        let ban = self
            .conn
            .query_row(
                "SELECT id, ban_number, client_id, account_type, status
                 FROM bans WHERE ban_number = ?1",
                params![ban_number],
                |row| {
                    let status: String = row.get(4)?;
                    Ok(BanRecord {
                        id: row.get(0)?,
                        ban_number: row.get(1)?,
                        client_id: row.get(2)?,
                        account_type: row.get(3)?,
                        status: BanStatus::coerce(Some(status.as_str())),
                    })
                },
            )
            .optional()?;

        Ok(ban)
    }

    fn insert_client(&mut self, client: &ClientDraft, name: &str) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO clients (
                owner_name, name, contact_person, email, phone,
                additional_phone, cellular, address, city, zip_code
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                client.owner_name,
                name,
                client.contact_person,
                client.email,
                client.phone,
                client.additional_phone,
                client.cellular,
                client.address,
                client.city,
                client.zip_code,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn insert_ban(&mut self, ban_number: &str, client_id: i64, ban: &BanDraft) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO bans (ban_number, client_id, account_type, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![ban_number, client_id, ban.account_type, ban.status.as_str()],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn find_subscriber_by_phone_and_ban(&mut self, phone: &str, ban_id: i64) -> Result<Option<i64>, StoreError> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM subscribers WHERE phone = ?1 AND ban_id = ?2",
                params![phone, ban_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(id)
    }

    fn insert_subscriber(&mut self, ban_id: i64, phone: &str, subscriber: &SubscriberDraft) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO subscribers (
                ban_id, phone, plan, monthly_value, remaining_payments,
                contract_term, contract_end_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                ban_id,
                phone,
                subscriber.plan,
                subscriber.monthly_value,
                subscriber.remaining_payments,
                subscriber.contract_term,
                subscriber.contract_end_date,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn record_event(&mut self, event: &Event) -> Result<(), StoreError> {
        insert_event(&self.conn, event)
    }
}

// ============================================================================
// TESTS
// ============================================================================
