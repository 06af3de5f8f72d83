//! Transactional allocation posting.
//!
//! All domain writes for one settled payment form a single unit of work:
//! one SQLite transaction covering every allocated line plus its ledger row.
//! A pre-read of the ledger (backed by the UNIQUE(settled_payment_id,
//! payment_for) constraint) makes the whole unit re-appliable: a retry after
//! a partial failure skips lines that already posted.

use super::{SaccoStore, SettledPaymentRow};
use crate::{
    allocation::AllocationLine,
    error::{SaccoError, SaccoResult},
    types::PaymentPurpose,
};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction};

impl SaccoStore {
    /// Apply every allocation line for `payment` to the domain tables and
    /// append one ledger row per line, atomically.
    ///
    /// A malformed line (loan repayment without a resolvable loan) is logged
    /// and skipped; the other categories still post.
    pub fn post_allocation(
        &mut self,
        payment: &SettledPaymentRow,
        member_id: &str,
        lines: &[AllocationLine],
    ) -> SaccoResult<()> {
        let deposit_date = payment
            .transaction_date
            .unwrap_or(payment.created_at)
            .date_naive()
            .to_string();
        let tx = self.conn.transaction()?;

        for line in lines {
            if line.amount <= 0.0 {
                continue;
            }
            let already_posted: Option<i64> = tx
                .query_row(
                    "SELECT id FROM payments_ledger
                     WHERE settled_payment_id = ?1 AND payment_for = ?2",
                    params![payment.id, line.purpose.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if already_posted.is_some() {
                log::debug!(
                    "posting: payment={} category={} already posted, skipping",
                    payment.id,
                    line.purpose.as_str()
                );
                continue;
            }

            match apply_domain_write(&tx, member_id, line, &deposit_date) {
                Ok(()) => {}
                Err(SaccoError::AllocationInconsistency(msg)) => {
                    log::warn!("posting: payment={} {msg}; category skipped", payment.id);
                    continue;
                }
                Err(e) => return Err(e),
            }

            tx.execute(
                "INSERT INTO payments_ledger (member_id, payment_for, amount, related_id, settled_payment_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    member_id,
                    line.purpose.as_str(),
                    line.amount,
                    line.related_id,
                    payment.id,
                    Utc::now().to_rfc3339(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

/// Mutate the domain table for one line. An `AllocationInconsistency` means
/// this line cannot be applied (the ledger row is withheld and the caller
/// moves on); any other error aborts the transaction.
fn apply_domain_write(
    tx: &Transaction<'_>,
    member_id: &str,
    line: &AllocationLine,
    deposit_date: &str,
) -> SaccoResult<()> {
    match line.purpose {
        PaymentPurpose::DailyDeposit => {
            tx.execute(
                "INSERT INTO daily_deposits (member_id, amount, deposit_date, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![member_id, line.amount, deposit_date, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        }
        PaymentPurpose::LoanRepayment => {
            let loan_id = line.related_id.as_deref().ok_or_else(|| {
                SaccoError::AllocationInconsistency(
                    "loan repayment carries no target loan id".into(),
                )
            })?;
            let balances: Option<(f64, f64)> = tx
                .query_row(
                    "SELECT loan_balance, paid_amount FROM loans WHERE id = ?1",
                    params![loan_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (balance, paid) = balances.ok_or_else(|| {
                SaccoError::AllocationInconsistency(format!(
                    "loan repayment targets unknown loan {loan_id}"
                ))
            })?;
            let new_paid = paid + line.amount;
            let new_balance = (balance - line.amount).max(0.0);
            let status = if new_balance == 0.0 { "Repaid" } else { "Active" };
            tx.execute(
                "UPDATE loans SET paid_amount = ?1, loan_balance = ?2, status = ?3 WHERE id = ?4",
                params![new_paid, new_balance, status, loan_id],
            )?;
            Ok(())
        }
        PaymentPurpose::Shares => {
            let prior: f64 = tx.query_row(
                "SELECT COALESCE(SUM(amount), 0.0) FROM shares WHERE member_id = ?1",
                params![member_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO shares (member_id, amount, total_shares, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![member_id, line.amount, prior + line.amount, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        }
        PaymentPurpose::Membership => {
            tx.execute(
                "INSERT INTO membership (member_id, reg_fee, status, paid_at)
                 VALUES (?1, ?2, 'paid', ?3)
                 ON CONFLICT(member_id) DO UPDATE SET
                     status = 'paid', reg_fee = excluded.reg_fee, paid_at = excluded.paid_at",
                params![member_id, line.amount, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        }
        PaymentPurpose::Welfare => {
            tx.execute(
                "INSERT INTO welfare (member_id, amount, status, deposit_date)
                 VALUES (?1, ?2, 'paid', ?3)",
                params![member_id, line.amount, deposit_date],
            )?;
            Ok(())
        }
        PaymentPurpose::MixedPayment => Err(SaccoError::AllocationInconsistency(
            "MixedPayment is not a postable category".into(),
        )),
    }
}
