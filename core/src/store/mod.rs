//! SQLite persistence layer.
//!
//! RULE: Only the store module talks to the database.
//! Handlers and the allocation pipeline call store methods; they never
//! execute SQL directly.

use crate::{
    allocation::Breakdown,
    error::SaccoResult,
    types::{MemberId, PaymentPurpose, RequestStatus},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

mod domain;
mod payments;
mod posting;

pub struct SaccoStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl SaccoStore {
    pub fn open(path: &str) -> SaccoResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SaccoResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases this returns a fresh, isolated database.
    pub fn reopen(&self) -> SaccoResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SaccoResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_payments.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_domain.sql"))?;
        Ok(())
    }

    // ── Members ────────────────────────────────────────────────

    pub fn insert_member(&self, m: &MemberRow) -> SaccoResult<()> {
        self.conn.execute(
            "INSERT INTO members (id, member_no, user_name, phone, id_no, email, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                m.id,
                m.member_no,
                m.user_name,
                m.phone,
                m.id_no,
                m.email,
                m.status,
                m.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn member_by_no(&self, member_no: &str) -> SaccoResult<Option<MemberRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, member_no, user_name, phone, id_no, email, status, created_at
                 FROM members WHERE member_no = ?1",
                params![member_no],
                member_row_mapper,
            )
            .optional()?;
        Ok(row)
    }

    pub fn member_by_id(&self, id: &str) -> SaccoResult<Option<MemberRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, member_no, user_name, phone, id_no, email, status, created_at
                 FROM members WHERE id = ?1",
                params![id],
                member_row_mapper,
            )
            .optional()?;
        Ok(row)
    }

    pub fn active_members(&self) -> SaccoResult<Vec<MemberRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, member_no, user_name, phone, id_no, email, status, created_at
             FROM members WHERE status = 'active' ORDER BY member_no ASC",
        )?;
        let rows = stmt
            .query_map([], member_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Allocate the next sequential member number, e.g. `TPS-0007`.
    pub fn next_member_no(&self, prefix: &str) -> SaccoResult<String> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM members", [], |row| row.get(0))?;
        Ok(format!("{prefix}-{:04}", count + 1))
    }

    // ── Settings ───────────────────────────────────────────────

    pub fn get_setting(&self, key: &str) -> SaccoResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> SaccoResult<()> {
        self.conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    // ── Activity log ───────────────────────────────────────────

    pub fn log_activity(&self, entry: &ActivityEntry) -> SaccoResult<()> {
        self.conn.execute(
            "INSERT INTO activity_log (job_name, activity_type, related_table, related_id, details, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.job_name,
                entry.activity_type,
                entry.related_table,
                entry.related_id,
                entry.details.to_string(),
                entry.status,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ── Test helper methods ────────────────────────────────────

    pub fn member_count(&self) -> SaccoResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM members", [], |row| row.get(0))
            .map_err(Into::into)
    }

    pub fn activity_count(&self, job_name: &str, status: &str) -> SaccoResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM activity_log WHERE job_name = ?1 AND status = ?2",
                params![job_name, status],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }
}

// ── Row types ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MemberRow {
    pub id: MemberId,
    pub member_no: String,
    pub user_name: String,
    pub phone: Option<String>,
    pub id_no: Option<String>,
    pub email: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PaymentRequestRow {
    pub id: String,
    pub member_id: MemberId,
    pub amount: f64,
    pub phone: String,
    pub payment_for: String,
    pub related_id: Option<String>,
    pub breakdown: Breakdown,
    pub status: RequestStatus,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SettledPaymentRow {
    pub id: String,
    pub correlation_id: Option<String>,
    pub merchant_request_id: Option<String>,
    pub receipt: Option<String>,
    pub phone: Option<String>,
    pub amount: f64,
    pub transaction_date: Option<DateTime<Utc>>,
    pub status: RequestStatus,
    pub payment_for: Option<PaymentPurpose>,
    pub related_id: Option<String>,
    pub raw_payload: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LedgerEntryRow {
    pub id: i64,
    pub member_id: MemberId,
    pub payment_for: String,
    pub amount: f64,
    pub related_id: Option<String>,
    pub settled_payment_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LoanRow {
    pub id: String,
    pub member_id: MemberId,
    pub principal: f64,
    pub loan_balance: f64,
    pub paid_amount: f64,
    pub status: String,
    pub approved_date: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub job_name: String,
    pub activity_type: String,
    pub related_table: Option<String>,
    pub related_id: Option<String>,
    pub details: serde_json::Value,
    pub status: String,
}

fn member_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        id: row.get(0)?,
        member_no: row.get(1)?,
        user_name: row.get(2)?,
        phone: row.get(3)?,
        id_no: row.get(4)?,
        email: row.get(5)?,
        status: row.get(6)?,
        created_at: parse_ts(row.get::<_, String>(7)?),
    })
}

/// Timestamps are stored as RFC 3339 text; rows written by this crate always
/// parse, so a malformed value degrades to the epoch rather than failing the read.
pub(crate) fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
}
