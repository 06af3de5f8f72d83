//! Settlement-callback correlation.
//!
//! Parses the provider's loosely-shaped webhook payload into a canonical
//! record, locates the originating payment request, drives its one status
//! transition, records the settled payment, and (on success only) hands the
//! request's declared breakdown to the ledger poster.

use crate::{
    allocation::breakdown_lines,
    error::{SaccoError, SaccoResult},
    probe,
    store::{SaccoStore, SettledPaymentRow},
    types::{PaymentPurpose, RequestStatus},
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Canonical form of one settlement webhook, whatever shape it arrived in.
#[derive(Debug, Clone)]
pub struct ProviderCallback {
    pub result_code: i64,
    pub result_desc: String,
    pub correlation_id: Option<String>,
    pub merchant_request_id: Option<String>,
    pub amount: Option<f64>,
    pub receipt: Option<String>,
    pub phone: Option<String>,
    pub transaction_date: Option<String>,
}

impl ProviderCallback {
    /// Probe the raw tree along the known candidate paths for each logical
    /// field. Absent fields become `None`; an absent result code is treated
    /// as failure (-1).
    pub fn parse(raw: &Value) -> Self {
        let cb = probe::first_match(raw, &["Body.stkCallback", "body.stkCallback", "stkCallback", ""])
            .unwrap_or(raw);

        let result_code = probe::first_match(cb, &["ResultCode", "resultCode", "Result"])
            .and_then(probe::as_amount)
            .map(|v| v as i64)
            .unwrap_or(-1);
        let result_desc = probe::first_match(cb, &["ResultDesc", "resultDesc", "ResultDescription"])
            .and_then(probe::as_text)
            .unwrap_or_default();
        let correlation_id = probe::first_match(cb, &["CheckoutRequestID", "checkoutRequestID"])
            .and_then(probe::as_text);
        let merchant_request_id = probe::first_match(cb, &["MerchantRequestID", "merchantRequestID"])
            .and_then(probe::as_text);

        let items = probe::first_match(
            cb,
            &["CallbackMetadata.Item", "callbackMetadata.Item", "CallbackMetadata"],
        );
        let item = |names: &[&str]| items.and_then(|i| probe::metadata_item(i, names));

        let amount = probe::first_match(cb, &["Amount"])
            .and_then(probe::as_amount)
            .or_else(|| item(&["Amount"]).and_then(probe::as_amount));
        let receipt = probe::first_match(cb, &["MpesaReceiptNumber"])
            .and_then(probe::as_text)
            .or_else(|| item(&["MpesaReceiptNumber", "ReceiptNumber"]).and_then(probe::as_text));
        let phone = probe::first_match(cb, &["PhoneNumber"])
            .and_then(probe::as_text)
            .or_else(|| item(&["PhoneNumber", "MSISDN"]).and_then(probe::as_text));
        let transaction_date = probe::first_match(cb, &["TransactionDate"])
            .and_then(probe::as_text)
            .or_else(|| item(&["TransactionDate", "Transaction"]).and_then(probe::as_text));

        Self {
            result_code,
            result_desc,
            correlation_id,
            merchant_request_id,
            amount,
            receipt,
            phone,
            transaction_date,
        }
    }
}

/// Parse the provider's compact `YYYYMMDDHHMMSS` timestamp as UTC, falling
/// back to RFC 3339. Unparseable input yields `None`; a bad timestamp never
/// aborts a settlement.
pub fn parse_transaction_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.len() == 14 && raw.chars().all(|c| c.is_ascii_digit()) {
        return NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S")
            .ok()
            .map(|dt| dt.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// What the correlator did with a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Settlement applied; the request transitioned to the given status.
    Processed(RequestStatus),
    /// The request was already finalized: duplicate delivery, nothing done.
    Replay,
}

/// Correlate and apply one settlement callback.
///
/// Errors out only on the unrecoverable cases (`MissingCorrelationId`,
/// `RequestNotFound`, storage failure); the provider-facing wrapper in
/// `api` converts those into the protocol acknowledgement.
pub fn process_callback(store: &mut SaccoStore, raw: &Value) -> SaccoResult<CallbackOutcome> {
    let cb = ProviderCallback::parse(raw);
    let correlation_id = cb
        .correlation_id
        .clone()
        .ok_or(SaccoError::MissingCorrelationId)?;

    let request = store
        .request_by_correlation(&correlation_id)?
        .ok_or_else(|| SaccoError::RequestNotFound(correlation_id.clone()))?;

    let status = if cb.result_code == 0 {
        RequestStatus::Success
    } else {
        RequestStatus::Failed
    };

    // Conditional transition: zero rows affected means the request was
    // already finalized and this delivery is a replay.
    if !store.finalize_request(&request.id, status)? {
        log::info!(
            "callback: request {} already finalized, ignoring replay (correlation {correlation_id})",
            request.id
        );
        return Ok(CallbackOutcome::Replay);
    }
    log::info!(
        "callback: request {} -> {} (code {} '{}')",
        request.id,
        status.as_str(),
        cb.result_code,
        cb.result_desc
    );

    let payment = SettledPaymentRow {
        id: Uuid::new_v4().to_string(),
        correlation_id: Some(correlation_id),
        merchant_request_id: cb.merchant_request_id.clone(),
        receipt: cb.receipt.clone(),
        phone: cb.phone.clone().or_else(|| Some(request.phone.clone())),
        amount: cb.amount.unwrap_or(request.amount),
        transaction_date: cb
            .transaction_date
            .as_deref()
            .and_then(parse_transaction_date),
        status,
        payment_for: PaymentPurpose::parse_allowed_tag(&request.payment_for),
        related_id: request.related_id.clone(),
        raw_payload: raw.to_string(),
        created_at: Utc::now(),
    };
    store.insert_settled_payment(&payment)?;

    if status != RequestStatus::Success {
        return Ok(CallbackOutcome::Processed(status));
    }

    let allocation = breakdown_lines(&request.breakdown);
    if let Some(rerouted) = allocation.rerouted_loan_amount {
        log::warn!(
            "callback: payment {} declared a loan repayment of {rerouted} with no target loan; rerouted to DailyDeposit",
            payment.id
        );
    }
    store.post_allocation(&payment, &request.member_id, &allocation.lines)?;
    Ok(CallbackOutcome::Processed(status))
}
