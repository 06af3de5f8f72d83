//! Unsolicited bill-pay (C2B) handling: the synchronous validation check the
//! provider runs before prompting the payer, and the confirmation posted
//! after the payer completes payment at the paybill.
//!
//! Unlike the push flow there is no prior pending request: the member is
//! resolved from the free-text bill reference, and the split is decided by
//! the rule cascade against the member's live state.

use crate::{
    allocation::allocate_mixed,
    config::AllocationConfig,
    error::{SaccoError, SaccoResult},
    phone,
    store::{MemberRow, SaccoStore, SettledPaymentRow},
    types::{PaymentPurpose, RequestStatus},
};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

/// Normalize a free-text bill reference into the internal member-number
/// format: strip non-alphanumerics, uppercase, dash after the first three
/// characters (`tpsk1234` → `TPS-K1234`).
pub fn normalize_member_no(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if cleaned.len() <= 3 {
        return cleaned;
    }
    format!("{}-{}", &cleaned[..3], &cleaned[3..])
}

/// Outcome of the validation phase, in the provider's own code space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillPayDecision {
    Accepted,
    /// Subscriber number not in the expected national format.
    RejectedSubscriber,
    /// Bill reference empty after normalization, or no such member.
    RejectedAccount,
}

/// Validation phase: can this subscriber pay against this bill reference?
pub fn validate_bill_reference(
    store: &SaccoStore,
    msisdn: &str,
    bill_ref: &str,
) -> SaccoResult<BillPayDecision> {
    if !phone::is_valid_c2b_msisdn(msisdn) {
        return Ok(BillPayDecision::RejectedSubscriber);
    }
    let member_no = normalize_member_no(bill_ref);
    if member_no.is_empty() {
        return Ok(BillPayDecision::RejectedAccount);
    }
    match store.member_by_no(&member_no)? {
        Some(_) => Ok(BillPayDecision::Accepted),
        None => {
            log::info!("billpay: rejecting unknown account reference '{bill_ref}' ({member_no})");
            Ok(BillPayDecision::RejectedAccount)
        }
    }
}

/// A confirmed bill payment as delivered by the provider.
#[derive(Debug, Clone)]
pub struct BillPayConfirmation {
    pub bill_ref: String,
    pub amount: f64,
    pub transaction_id: String,
    pub phone: Option<String>,
    pub payment_date: Option<String>,
    /// Full provider payload, retained on the settled payment for audit.
    pub raw: Value,
}

/// What confirmation did with the payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Settled payment recorded and allocated.
    Posted,
    /// Transaction id already settled; acknowledged without reinserting.
    Duplicate,
}

/// Confirmation phase: record and allocate an unsolicited payment.
pub fn confirm_bill_payment(
    store: &mut SaccoStore,
    cfg: &AllocationConfig,
    confirmation: &BillPayConfirmation,
) -> SaccoResult<ConfirmationOutcome> {
    if confirmation.transaction_id.trim().is_empty() {
        return Err(SaccoError::Validation("transaction id is required".into()));
    }
    if confirmation.amount <= 0.0 {
        return Err(SaccoError::Validation("amount must be positive".into()));
    }

    let member = resolve_member(store, &confirmation.bill_ref)?;

    // Replay protection: the provider retries confirmations, keyed by receipt.
    if store
        .settled_payment_by_receipt(&confirmation.transaction_id)?
        .is_some()
    {
        log::info!(
            "billpay: transaction {} already settled, acknowledging replay",
            confirmation.transaction_id
        );
        return Ok(ConfirmationOutcome::Duplicate);
    }

    let payment = SettledPaymentRow {
        id: Uuid::new_v4().to_string(),
        correlation_id: None,
        merchant_request_id: None,
        receipt: Some(confirmation.transaction_id.clone()),
        phone: confirmation.phone.clone(),
        amount: confirmation.amount,
        transaction_date: confirmation
            .payment_date
            .as_deref()
            .and_then(crate::callback::parse_transaction_date)
            .or_else(|| Some(Utc::now())),
        status: RequestStatus::Success,
        payment_for: Some(PaymentPurpose::MixedPayment),
        related_id: Some(member.id.clone()),
        raw_payload: confirmation.raw.to_string(),
        created_at: Utc::now(),
    };
    store.insert_settled_payment(&payment)?;

    let snapshot = store.member_snapshot(&member.id)?;
    let lines = allocate_mixed(&snapshot, confirmation.amount, cfg);
    store.post_allocation(&payment, &member.id, &lines)?;
    log::info!(
        "billpay: settled {} for member {} across {} categories",
        confirmation.amount,
        member.member_no,
        lines.len()
    );
    Ok(ConfirmationOutcome::Posted)
}

fn resolve_member(store: &SaccoStore, bill_ref: &str) -> SaccoResult<MemberRow> {
    let member_no = normalize_member_no(bill_ref);
    if member_no.is_empty() {
        return Err(SaccoError::Validation("empty bill reference".into()));
    }
    store
        .member_by_no(&member_no)?
        .ok_or_else(|| SaccoError::Validation(format!("no member with number {member_no}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_no_normalization_inserts_the_separator() {
        assert_eq!(normalize_member_no("tps0001"), "TPS-0001");
        assert_eq!(normalize_member_no("TPS-0001"), "TPS-0001");
        assert_eq!(normalize_member_no(" tps k1234 "), "TPS-K1234");
        assert_eq!(normalize_member_no("tp"), "TP");
        assert_eq!(normalize_member_no("!!"), "");
    }
}
