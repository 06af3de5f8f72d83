//! Domain-table reads and writes: loans, shares, membership, welfare,
//! daily deposits, deductions, plus the member financial snapshot the
//! allocation rules evaluate.

use super::{parse_ts, LoanRow, SaccoStore};
use crate::{
    allocation::{ActiveLoan, MemberSnapshot},
    error::SaccoResult,
};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

impl SaccoStore {
    // ── Loans ──────────────────────────────────────────────────

    pub fn insert_loan(&self, l: &LoanRow) -> SaccoResult<()> {
        self.conn.execute(
            "INSERT INTO loans (id, member_id, principal, loan_balance, paid_amount, status, approved_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                l.id,
                l.member_id,
                l.principal,
                l.loan_balance,
                l.paid_amount,
                l.status,
                l.approved_date,
                l.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn loan_by_id(&self, id: &str) -> SaccoResult<Option<LoanRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, member_id, principal, loan_balance, paid_amount, status, approved_date, created_at
                 FROM loans WHERE id = ?1",
                params![id],
                loan_row_mapper,
            )
            .optional()?;
        Ok(row)
    }

    // ── Member financial snapshot ──────────────────────────────

    /// Assemble the state the mixed-payment rule cascade reads: membership
    /// paid flag, cumulative shares, active loans oldest-approved first, and
    /// whether the most recent welfare contribution is paid.
    pub fn member_snapshot(&self, member_id: &str) -> SaccoResult<MemberSnapshot> {
        let membership_paid: bool = self
            .conn
            .query_row(
                "SELECT status FROM membership WHERE member_id = ?1",
                params![member_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|s| s == "paid")
            .unwrap_or(false);

        let shares_total: f64 = self.conn.query_row(
            "SELECT COALESCE(SUM(amount), 0.0) FROM shares WHERE member_id = ?1",
            params![member_id],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT id, loan_balance FROM loans
             WHERE member_id = ?1 AND status = 'Active'
             ORDER BY approved_date ASC",
        )?;
        let active_loans = stmt
            .query_map(params![member_id], |row| {
                Ok(ActiveLoan {
                    id: row.get(0)?,
                    balance: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let last_welfare_paid: bool = self
            .conn
            .query_row(
                "SELECT status FROM welfare WHERE member_id = ?1
                 ORDER BY deposit_date DESC LIMIT 1",
                params![member_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|s| s == "paid")
            .unwrap_or(false);

        Ok(MemberSnapshot {
            member_id: member_id.to_string(),
            membership_paid,
            shares_total,
            active_loans,
            last_welfare_paid,
        })
    }

    // ── Daily deposits / deductions (fines sweep) ──────────────

    pub fn has_deposit_on(&self, member_id: &str, date: &str) -> SaccoResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM daily_deposits WHERE member_id = ?1 AND deposit_date = ?2",
            params![member_id, date],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a savings fine unless one already exists for the member and
    /// date (the unique index turns a rerun into a no-op).
    pub fn insert_savings_fine(
        &self,
        member_id: &str,
        amount: f64,
        date: &str,
    ) -> SaccoResult<bool> {
        let n = self.conn.execute(
            "INSERT OR IGNORE INTO deductions (member_id, amount, deduction_type, reason, applied_date, created_at)
             VALUES (?1, ?2, 'savings_fine', 'missed daily deposit', ?3, ?4)",
            params![member_id, amount, date, Utc::now().to_rfc3339()],
        )?;
        Ok(n > 0)
    }

    // ── Test helper methods ────────────────────────────────────

    pub fn daily_deposit_total(&self, member_id: &str) -> SaccoResult<f64> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0.0) FROM daily_deposits WHERE member_id = ?1",
                params![member_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    pub fn shares_total(&self, member_id: &str) -> SaccoResult<f64> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0.0) FROM shares WHERE member_id = ?1",
                params![member_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    pub fn latest_shares_snapshot(&self, member_id: &str) -> SaccoResult<Option<f64>> {
        let snapshot = self
            .conn
            .query_row(
                "SELECT total_shares FROM shares WHERE member_id = ?1
                 ORDER BY id DESC LIMIT 1",
                params![member_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(snapshot)
    }

    pub fn welfare_count(&self, member_id: &str) -> SaccoResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM welfare WHERE member_id = ?1",
                params![member_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    pub fn deduction_count(&self, member_id: &str) -> SaccoResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM deductions WHERE member_id = ?1",
                params![member_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Record a daily deposit outside the allocation path (test seeding and
    /// the ops tool).
    pub fn insert_daily_deposit(&self, member_id: &str, amount: f64, date: &str) -> SaccoResult<()> {
        self.conn.execute(
            "INSERT INTO daily_deposits (member_id, amount, deposit_date, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![member_id, amount, date, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

fn loan_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<LoanRow> {
    Ok(LoanRow {
        id: row.get(0)?,
        member_id: row.get(1)?,
        principal: row.get(2)?,
        loan_balance: row.get(3)?,
        paid_amount: row.get(4)?,
        status: row.get(5)?,
        approved_date: row.get(6)?,
        created_at: parse_ts(row.get::<_, String>(7)?),
    })
}
