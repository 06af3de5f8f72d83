//! Shared primitive types used across the payment core.

use serde::{Deserialize, Serialize};

/// A stable, unique identifier for a member row.
pub type MemberId = String;

/// A stable, unique identifier for a loan row.
pub type LoanId = String;

/// Store-assigned identifier of a push-payment request.
pub type RequestId = String;

/// Store-assigned identifier of a settled payment.
pub type SettledPaymentId = String;

/// Lifecycle of a push-payment request. `Pending` transitions exactly once,
/// to `Success` or `Failed`; both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Success,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "Pending",
            RequestStatus::Success => "Success",
            RequestStatus::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(RequestStatus::Pending),
            "Success" => Some(RequestStatus::Success),
            "Failed" => Some(RequestStatus::Failed),
            _ => None,
        }
    }
}

/// Obligation category a payment (or a slice of one) is applied to.
///
/// The first five are the allocation categories; `MixedPayment` tags a
/// payment whose split is decided by the rule engine rather than declared
/// up front, and never appears on a ledger line itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentPurpose {
    DailyDeposit,
    LoanRepayment,
    Shares,
    Membership,
    Welfare,
    MixedPayment,
}

impl PaymentPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPurpose::DailyDeposit => "DailyDeposit",
            PaymentPurpose::LoanRepayment => "LoanRepayment",
            PaymentPurpose::Shares => "Shares",
            PaymentPurpose::Membership => "Membership",
            PaymentPurpose::Welfare => "Welfare",
            PaymentPurpose::MixedPayment => "MixedPayment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DailyDeposit" => Some(PaymentPurpose::DailyDeposit),
            "LoanRepayment" => Some(PaymentPurpose::LoanRepayment),
            "Shares" => Some(PaymentPurpose::Shares),
            "Membership" => Some(PaymentPurpose::Membership),
            "Welfare" => Some(PaymentPurpose::Welfare),
            "MixedPayment" => Some(PaymentPurpose::MixedPayment),
            _ => None,
        }
    }

    /// Purpose tags accepted on a settled payment coming back from the
    /// provider. Anything else is stored as a null purpose, not rejected.
    pub fn parse_allowed_tag(s: &str) -> Option<Self> {
        match Self::parse(s) {
            Some(PaymentPurpose::MixedPayment) | None => None,
            other => other,
        }
    }
}

/// Comparison tolerance for monetary amounts (KES stored as f64).
pub const AMOUNT_EPSILON: f64 = 0.005;
