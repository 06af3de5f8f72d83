//! Payment-request, settled-payment and ledger row operations.

use super::{parse_ts, LedgerEntryRow, PaymentRequestRow, SaccoStore, SettledPaymentRow};
use crate::{
    error::SaccoResult,
    types::{PaymentPurpose, RequestStatus, AMOUNT_EPSILON},
};
use rusqlite::{params, OptionalExtension};

impl SaccoStore {
    // ── Payment requests ───────────────────────────────────────

    pub fn insert_payment_request(&self, r: &PaymentRequestRow) -> SaccoResult<()> {
        self.conn.execute(
            "INSERT INTO payment_request (
                id, member_id, amount, phone, payment_for, related_id,
                breakdown, status, correlation_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                r.id,
                r.member_id,
                r.amount,
                r.phone,
                r.payment_for,
                r.related_id,
                serde_json::to_string(&r.breakdown)?,
                r.status.as_str(),
                r.correlation_id,
                r.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recently created `Pending` request for the same member and
    /// amount, if any. Best-effort dedup: read-then-write, see the factory.
    pub fn latest_pending_request(
        &self,
        member_id: &str,
        amount: f64,
    ) -> SaccoResult<Option<PaymentRequestRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, member_id, amount, phone, payment_for, related_id,
                        breakdown, status, correlation_id, created_at
                 FROM payment_request
                 WHERE member_id = ?1 AND ABS(amount - ?2) < ?3 AND status = 'Pending'
                 ORDER BY created_at DESC LIMIT 1",
                params![member_id, amount, AMOUNT_EPSILON],
                request_row_mapper,
            )
            .optional()?;
        Ok(row)
    }

    pub fn request_by_id(&self, id: &str) -> SaccoResult<Option<PaymentRequestRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, member_id, amount, phone, payment_for, related_id,
                        breakdown, status, correlation_id, created_at
                 FROM payment_request WHERE id = ?1",
                params![id],
                request_row_mapper,
            )
            .optional()?;
        Ok(row)
    }

    pub fn request_by_correlation(&self, correlation_id: &str) -> SaccoResult<Option<PaymentRequestRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, member_id, amount, phone, payment_for, related_id,
                        breakdown, status, correlation_id, created_at
                 FROM payment_request WHERE correlation_id = ?1",
                params![correlation_id],
                request_row_mapper,
            )
            .optional()?;
        Ok(row)
    }

    /// Attach the provider correlation id. Write-once: the update only lands
    /// while the column is still null.
    pub fn set_correlation_id(&self, request_id: &str, correlation_id: &str) -> SaccoResult<bool> {
        let n = self.conn.execute(
            "UPDATE payment_request SET correlation_id = ?1
             WHERE id = ?2 AND correlation_id IS NULL",
            params![correlation_id, request_id],
        )?;
        Ok(n > 0)
    }

    /// Drive the one allowed status transition. The `status = 'Pending'`
    /// guard makes replayed callbacks a no-op: zero rows affected means the
    /// request was already finalized.
    pub fn finalize_request(&self, request_id: &str, status: RequestStatus) -> SaccoResult<bool> {
        let n = self.conn.execute(
            "UPDATE payment_request SET status = ?1
             WHERE id = ?2 AND status = 'Pending'",
            params![status.as_str(), request_id],
        )?;
        Ok(n > 0)
    }

    // ── Settled payments ───────────────────────────────────────

    pub fn insert_settled_payment(&self, p: &SettledPaymentRow) -> SaccoResult<()> {
        self.conn.execute(
            "INSERT INTO settled_payment (
                id, correlation_id, merchant_request_id, receipt, phone, amount,
                transaction_date, status, payment_for, related_id, raw_payload, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                p.id,
                p.correlation_id,
                p.merchant_request_id,
                p.receipt,
                p.phone,
                p.amount,
                p.transaction_date.map(|d| d.to_rfc3339()),
                p.status.as_str(),
                p.payment_for.map(|f| f.as_str()),
                p.related_id,
                p.raw_payload,
                p.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn settled_payment_by_receipt(&self, receipt: &str) -> SaccoResult<Option<SettledPaymentRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, correlation_id, merchant_request_id, receipt, phone, amount,
                        transaction_date, status, payment_for, related_id, raw_payload, created_at
                 FROM settled_payment WHERE receipt = ?1",
                params![receipt],
                settled_row_mapper,
            )
            .optional()?;
        Ok(row)
    }

    pub fn settled_payments_for_correlation(
        &self,
        correlation_id: &str,
    ) -> SaccoResult<Vec<SettledPaymentRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, correlation_id, merchant_request_id, receipt, phone, amount,
                    transaction_date, status, payment_for, related_id, raw_payload, created_at
             FROM settled_payment WHERE correlation_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![correlation_id], settled_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Ledger ─────────────────────────────────────────────────

    pub fn ledger_entries_for_payment(&self, settled_payment_id: &str) -> SaccoResult<Vec<LedgerEntryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, member_id, payment_for, amount, related_id, settled_payment_id, created_at
             FROM payments_ledger WHERE settled_payment_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![settled_payment_id], |row| {
                Ok(LedgerEntryRow {
                    id: row.get(0)?,
                    member_id: row.get(1)?,
                    payment_for: row.get(2)?,
                    amount: row.get(3)?,
                    related_id: row.get(4)?,
                    settled_payment_id: row.get(5)?,
                    created_at: parse_ts(row.get::<_, String>(6)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Test helper methods ────────────────────────────────────

    pub fn settled_payment_count(&self) -> SaccoResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM settled_payment", [], |row| row.get(0))
            .map_err(Into::into)
    }

    pub fn ledger_count(&self) -> SaccoResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM payments_ledger", [], |row| row.get(0))
            .map_err(Into::into)
    }

    pub fn pending_request_count(&self, member_id: &str) -> SaccoResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM payment_request WHERE member_id = ?1 AND status = 'Pending'",
                params![member_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }
}

fn request_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<PaymentRequestRow> {
    let breakdown_json: String = row.get(6)?;
    let status_raw: String = row.get(7)?;
    Ok(PaymentRequestRow {
        id: row.get(0)?,
        member_id: row.get(1)?,
        amount: row.get(2)?,
        phone: row.get(3)?,
        payment_for: row.get(4)?,
        related_id: row.get(5)?,
        breakdown: serde_json::from_str(&breakdown_json).unwrap_or_default(),
        status: RequestStatus::parse(&status_raw).unwrap_or(RequestStatus::Pending),
        correlation_id: row.get(8)?,
        created_at: parse_ts(row.get::<_, String>(9)?),
    })
}

fn settled_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<SettledPaymentRow> {
    let status_raw: String = row.get(7)?;
    let purpose_raw: Option<String> = row.get(8)?;
    Ok(SettledPaymentRow {
        id: row.get(0)?,
        correlation_id: row.get(1)?,
        merchant_request_id: row.get(2)?,
        receipt: row.get(3)?,
        phone: row.get(4)?,
        amount: row.get(5)?,
        transaction_date: row
            .get::<_, Option<String>>(6)?
            .map(|s| parse_ts(s)),
        status: RequestStatus::parse(&status_raw).unwrap_or(RequestStatus::Failed),
        payment_for: purpose_raw.as_deref().and_then(PaymentPurpose::parse),
        related_id: row.get(9)?,
        raw_payload: row.get(10)?,
        created_at: parse_ts(row.get::<_, String>(11)?),
    })
}
