//! The logical endpoints of the payment subsystem.
//!
//! Handlers are stateless functions over the store; each inbound invocation
//! is independent. Provider-facing handlers (callback, validation,
//! confirmation) never let an internal error escape: the provider protocol
//! requires an acknowledgement with an embedded result code in all cases,
//! otherwise it retries without bound. The internal push-initiation handler
//! reports failures conventionally in its response body.

use crate::{
    allocation::Breakdown,
    billpay::{self, BillPayConfirmation, BillPayDecision},
    callback,
    config::AllocationConfig,
    error::SaccoError,
    gateway::PushGateway,
    request_factory,
    store::SaccoStore,
    types::{PaymentPurpose, RequestStatus},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Push initiation (internal endpoint) ────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct PushInitiationRequest {
    pub phone: String,
    pub total: f64,
    pub member_id: String,
    #[serde(default)]
    pub breakdown: Breakdown,
    #[serde(default)]
    pub payment_for: Option<String>,
    #[serde(default)]
    pub related_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushInitiationResponse {
    pub success: bool,
    #[serde(rename = "checkoutRequestID", skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PushInitiationResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            checkout_request_id: None,
            message: Some(message.into()),
        }
    }
}

/// Create (or reuse) the pending request and push it to the subscriber's
/// device. A gateway rejection marks the request `Failed` rather than
/// leaving it pending forever.
pub fn initiate_push_payment<G: PushGateway>(
    store: &mut SaccoStore,
    gateway: &G,
    req: &PushInitiationRequest,
) -> PushInitiationResponse {
    let purpose = req
        .payment_for
        .as_deref()
        .and_then(PaymentPurpose::parse)
        .unwrap_or(PaymentPurpose::MixedPayment);

    let request = match request_factory::create_or_reuse_request(
        store,
        &req.member_id,
        req.total,
        &req.phone,
        purpose,
        req.related_id.clone(),
        req.breakdown.clone(),
    ) {
        Ok(row) => row,
        Err(e) => {
            log::warn!("push initiation rejected: {e}");
            return PushInitiationResponse::failure(e.to_string());
        }
    };

    match gateway.initiate_push(&request) {
        Ok(accepted) => {
            match store.set_correlation_id(&request.id, &accepted.correlation_id) {
                Ok(true) => {}
                Ok(false) => log::warn!(
                    "push initiation: request {} already has a correlation id, keeping it",
                    request.id
                ),
                Err(e) => {
                    // The push is already on the subscriber's device; losing the
                    // correlation id makes the callback unmatchable.
                    log::error!(
                        "push initiation: failed to persist correlation id {} on request {}: {e}",
                        accepted.correlation_id,
                        request.id
                    );
                    return PushInitiationResponse::failure("failed to record provider response");
                }
            }
            PushInitiationResponse {
                success: true,
                checkout_request_id: Some(accepted.correlation_id),
                message: None,
            }
        }
        Err(e) => {
            log::error!("push initiation: gateway rejected request {}: {e}", request.id);
            if let Err(mark_err) = store.finalize_request(&request.id, RequestStatus::Failed) {
                log::error!(
                    "push initiation: could not mark request {} failed: {mark_err}",
                    request.id
                );
            }
            PushInitiationResponse::failure(e.to_string())
        }
    }
}

// ── Settlement callback (provider-facing) ──────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

/// Always acknowledges. Internal failures are logged with the raw payload
/// and reported as a soft-failure code so the provider stops retrying.
pub fn handle_stk_callback(store: &mut SaccoStore, raw: &Value) -> CallbackAck {
    match callback::process_callback(store, raw) {
        Ok(_) => CallbackAck {
            result_code: 0,
            result_desc: "Accepted".into(),
        },
        Err(e) => {
            match &e {
                SaccoError::MissingCorrelationId | SaccoError::RequestNotFound(_) => {
                    log::warn!("callback unmatchable: {e}; payload: {raw}");
                }
                _ => log::error!("callback processing failed: {e}; payload: {raw}"),
            }
            CallbackAck {
                result_code: 1,
                result_desc: "Failed".into(),
            }
        }
    }
}

// ── Bill-pay validation / confirmation (provider-facing) ───────

#[derive(Debug, Clone, Deserialize)]
pub struct BillPayValidationRequest {
    #[serde(rename = "MSISDN")]
    pub msisdn: String,
    #[serde(rename = "BillRefNumber")]
    pub bill_ref_number: String,
}

/// The provider's own accept/reject code space: `0` accepts, the `C2B...`
/// strings reject.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum C2bResultCode {
    Accepted(i64),
    Rejected(&'static str),
}

#[derive(Debug, Clone, Serialize)]
pub struct BillPayValidationResponse {
    #[serde(rename = "ResultCode")]
    pub result_code: C2bResultCode,
    #[serde(rename = "ResultDesc")]
    pub result_desc: &'static str,
}

pub fn handle_billpay_validation(
    store: &SaccoStore,
    req: &BillPayValidationRequest,
) -> BillPayValidationResponse {
    let decision = billpay::validate_bill_reference(store, &req.msisdn, &req.bill_ref_number)
        .unwrap_or_else(|e| {
            log::error!("billpay validation failed internally: {e}");
            BillPayDecision::RejectedAccount
        });
    match decision {
        BillPayDecision::Accepted => BillPayValidationResponse {
            result_code: C2bResultCode::Accepted(0),
            result_desc: "Accepted",
        },
        BillPayDecision::RejectedSubscriber => BillPayValidationResponse {
            result_code: C2bResultCode::Rejected("C2B00011"),
            result_desc: "Rejected",
        },
        BillPayDecision::RejectedAccount => BillPayValidationResponse {
            result_code: C2bResultCode::Rejected("C2B00012"),
            result_desc: "Rejected",
        },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillPayConfirmationRequest {
    #[serde(rename = "BillRefNumber")]
    pub bill_ref_number: String,
    #[serde(rename = "Amount")]
    pub amount: f64,
    #[serde(rename = "TransID")]
    pub trans_id: String,
    #[serde(rename = "Phone", default)]
    pub phone: Option<String>,
    #[serde(rename = "PaymentDate", default)]
    pub payment_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillPayConfirmationResponse {
    #[serde(rename = "ResultCode")]
    pub result_code: &'static str,
    #[serde(rename = "ResultDesc")]
    pub result_desc: &'static str,
}

pub fn handle_billpay_confirmation(
    store: &mut SaccoStore,
    cfg: &AllocationConfig,
    req: &BillPayConfirmationRequest,
) -> BillPayConfirmationResponse {
    let raw = serde_json::to_value(req).unwrap_or(Value::Null);
    let confirmation = BillPayConfirmation {
        bill_ref: req.bill_ref_number.clone(),
        amount: req.amount,
        transaction_id: req.trans_id.clone(),
        phone: req.phone.clone(),
        payment_date: req.payment_date.clone(),
        raw,
    };
    match billpay::confirm_bill_payment(store, cfg, &confirmation) {
        Ok(_) => BillPayConfirmationResponse {
            result_code: "0",
            result_desc: "Accepted",
        },
        Err(e) => {
            log::error!(
                "billpay confirmation failed for transaction {}: {e}",
                req.trans_id
            );
            BillPayConfirmationResponse {
                result_code: "1",
                result_desc: "Failed",
            }
        }
    }
}
