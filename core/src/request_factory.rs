//! Creation and best-effort deduplication of push-payment requests.
//!
//! The dedup check is read-then-write, not atomic: two concurrent submissions
//! for the same member and amount can still both insert. That window is
//! accepted; the check exists to absorb page retries and double-clicks, not
//! to be a correctness guarantee.

use crate::{
    allocation::Breakdown,
    error::{SaccoError, SaccoResult},
    phone,
    store::{PaymentRequestRow, SaccoStore},
    types::{PaymentPurpose, RequestStatus, AMOUNT_EPSILON},
};
use chrono::Utc;
use uuid::Uuid;

/// Create a `Pending` request for `amount`, or reuse the member's most
/// recent still-pending request for the same amount.
pub fn create_or_reuse_request(
    store: &SaccoStore,
    member_id: &str,
    amount: f64,
    raw_phone: &str,
    purpose: PaymentPurpose,
    related_id: Option<String>,
    breakdown: Breakdown,
) -> SaccoResult<PaymentRequestRow> {
    if member_id.trim().is_empty() {
        return Err(SaccoError::Validation("member_id is required".into()));
    }
    if amount <= 0.0 {
        return Err(SaccoError::Validation("amount must be positive".into()));
    }
    let msisdn = phone::normalize_msisdn(raw_phone);
    if !phone::is_valid_msisdn(&msisdn) {
        return Err(SaccoError::Validation(format!(
            "phone '{raw_phone}' is not a valid subscriber number"
        )));
    }
    let negative_part = breakdown.daily_deposit < 0.0
        || breakdown.shares < 0.0
        || breakdown.welfare < 0.0
        || breakdown.membership < 0.0
        || breakdown.loan_repayment.as_ref().map_or(false, |l| l.amount < 0.0);
    if negative_part {
        return Err(SaccoError::Validation(
            "breakdown amounts must be non-negative".into(),
        ));
    }
    if !breakdown.is_empty() && (breakdown.total() - amount).abs() > AMOUNT_EPSILON {
        return Err(SaccoError::Validation(format!(
            "breakdown sums to {} but amount is {amount}",
            breakdown.total()
        )));
    }

    if let Some(existing) = store.latest_pending_request(member_id, amount)? {
        log::info!(
            "request factory: reusing pending request {} for member {member_id} amount {amount}",
            existing.id
        );
        return Ok(existing);
    }

    let row = PaymentRequestRow {
        id: Uuid::new_v4().to_string(),
        member_id: member_id.to_string(),
        amount,
        phone: msisdn,
        payment_for: purpose.as_str().to_string(),
        related_id,
        breakdown,
        status: RequestStatus::Pending,
        correlation_id: None,
        created_at: Utc::now(),
    };
    store.insert_payment_request(&row)?;
    log::info!(
        "request factory: created request {} for member {member_id} amount {amount}",
        row.id
    );
    Ok(row)
}
