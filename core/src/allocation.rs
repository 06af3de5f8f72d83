//! Splitting one settled amount across a member's obligation categories.
//!
//! Two policies exist. Push-initiated deposits carry a member-chosen
//! [`Breakdown`] that is applied as declared. Unsolicited bill-pay amounts
//! carry no breakdown; an ordered rule cascade decides the split from the
//! member's current financial state. Both policies are pure (the same
//! state and amount always produce the same lines) and never emit a line
//! with a non-positive amount.

use crate::{
    config::AllocationConfig,
    types::{LoanId, MemberId, PaymentPurpose},
};
use serde::{Deserialize, Serialize};

/// The member-declared split of a push payment, stored as JSON on the
/// payment request. Wire names match the dashboard contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Breakdown {
    pub daily_deposit: f64,
    pub loan_repayment: Option<LoanRepaymentPart>,
    pub shares: f64,
    pub welfare: f64,
    pub membership: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanRepaymentPart {
    pub loan_id: Option<LoanId>,
    pub amount: f64,
}

impl Breakdown {
    pub fn total(&self) -> f64 {
        self.daily_deposit
            + self.loan_repayment.as_ref().map_or(0.0, |l| l.amount)
            + self.shares
            + self.welfare
            + self.membership
    }

    pub fn is_empty(&self) -> bool {
        self.total() <= 0.0
    }
}

/// One allocated slice: category, amount, and the related entity (the loan
/// id for repayments) that ends up on the ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationLine {
    pub purpose: PaymentPurpose,
    pub amount: f64,
    pub related_id: Option<String>,
}

impl AllocationLine {
    fn new(purpose: PaymentPurpose, amount: f64) -> Self {
        Self {
            purpose,
            amount,
            related_id: None,
        }
    }
}

/// An active loan as seen by the rule engine, ordered oldest-approved first
/// by the store query.
#[derive(Debug, Clone)]
pub struct ActiveLoan {
    pub id: LoanId,
    pub balance: f64,
}

/// The member state the rule cascade reads. Assembled by the store in one
/// query set; never mutated here.
#[derive(Debug, Clone)]
pub struct MemberSnapshot {
    pub member_id: MemberId,
    pub membership_paid: bool,
    pub shares_total: f64,
    pub active_loans: Vec<ActiveLoan>,
    pub last_welfare_paid: bool,
}

/// Result of expanding a pre-declared breakdown.
#[derive(Debug, Clone)]
pub struct BreakdownAllocation {
    pub lines: Vec<AllocationLine>,
    /// Loan-repayment amount that carried no target loan id and was rerouted
    /// to DailyDeposit. The caller logs this against the settled payment.
    pub rerouted_loan_amount: Option<f64>,
}

/// Policy (a): apply the split the member declared at request time.
///
/// A loan-repayment amount without a target loan id would otherwise vanish;
/// it is rerouted into the DailyDeposit slice and reported to the caller.
pub fn breakdown_lines(breakdown: &Breakdown) -> BreakdownAllocation {
    let mut daily = breakdown.daily_deposit;
    let mut rerouted = None;
    let mut lines = Vec::new();

    if let Some(loan) = &breakdown.loan_repayment {
        if loan.amount > 0.0 {
            match &loan.loan_id {
                Some(id) => lines.push(AllocationLine {
                    purpose: PaymentPurpose::LoanRepayment,
                    amount: loan.amount,
                    related_id: Some(id.clone()),
                }),
                None => {
                    rerouted = Some(loan.amount);
                    daily += loan.amount;
                }
            }
        }
    }
    if daily > 0.0 {
        lines.push(AllocationLine::new(PaymentPurpose::DailyDeposit, daily));
    }
    if breakdown.shares > 0.0 {
        lines.push(AllocationLine::new(PaymentPurpose::Shares, breakdown.shares));
    }
    if breakdown.membership > 0.0 {
        lines.push(AllocationLine::new(
            PaymentPurpose::Membership,
            breakdown.membership,
        ));
    }
    if breakdown.welfare > 0.0 {
        lines.push(AllocationLine::new(PaymentPurpose::Welfare, breakdown.welfare));
    }

    BreakdownAllocation {
        lines,
        rerouted_loan_amount: rerouted,
    }
}

/// One rule of the mixed-payment cascade: a predicate over the member state
/// and a split function. Rules are evaluated top-to-bottom; the first whose
/// predicate holds decides the whole split.
pub struct AllocationRule {
    pub name: &'static str,
    pub applies: fn(&MemberSnapshot, f64, &AllocationConfig) -> bool,
    pub split: fn(&MemberSnapshot, f64, &AllocationConfig) -> Vec<AllocationLine>,
}

fn membership_unpaid(s: &MemberSnapshot, _amount: f64, _cfg: &AllocationConfig) -> bool {
    !s.membership_paid
}

fn split_registration(_s: &MemberSnapshot, amount: f64, cfg: &AllocationConfig) -> Vec<AllocationLine> {
    let mut lines = vec![AllocationLine::new(
        PaymentPurpose::Membership,
        amount.min(cfg.membership_fee),
    )];
    if amount > cfg.membership_fee {
        lines.push(AllocationLine::new(
            PaymentPurpose::Shares,
            amount - cfg.membership_fee,
        ));
    }
    lines
}

fn has_active_loan(s: &MemberSnapshot, _amount: f64, _cfg: &AllocationConfig) -> bool {
    !s.active_loans.is_empty()
}

fn split_loan_priority(s: &MemberSnapshot, amount: f64, cfg: &AllocationConfig) -> Vec<AllocationLine> {
    // Oldest active loan first; the store orders by approved_date ascending.
    let loan = &s.active_loans[0];
    let mut lines = vec![AllocationLine::new(
        PaymentPurpose::DailyDeposit,
        amount.min(cfg.daily_deposit_amount),
    )];
    if amount > cfg.daily_deposit_amount {
        lines.push(AllocationLine {
            purpose: PaymentPurpose::LoanRepayment,
            amount: amount - cfg.daily_deposit_amount,
            related_id: Some(loan.id.clone()),
        });
    }
    lines
}

fn shares_below_target(s: &MemberSnapshot, _amount: f64, cfg: &AllocationConfig) -> bool {
    s.shares_total < cfg.shares_target
}

fn split_shares_priority(_s: &MemberSnapshot, amount: f64, cfg: &AllocationConfig) -> Vec<AllocationLine> {
    let mut lines = vec![AllocationLine::new(
        PaymentPurpose::DailyDeposit,
        amount.min(cfg.daily_deposit_amount),
    )];
    if amount > cfg.daily_deposit_amount {
        lines.push(AllocationLine::new(
            PaymentPurpose::Shares,
            amount - cfg.daily_deposit_amount,
        ));
    }
    lines
}

fn always(_s: &MemberSnapshot, _amount: f64, _cfg: &AllocationConfig) -> bool {
    true
}

fn split_welfare_or_savings(s: &MemberSnapshot, amount: f64, cfg: &AllocationConfig) -> Vec<AllocationLine> {
    if !s.last_welfare_paid || amount >= cfg.welfare_amount {
        let mut lines = vec![AllocationLine::new(
            PaymentPurpose::Welfare,
            amount.min(cfg.welfare_amount),
        )];
        if amount > cfg.welfare_amount {
            lines.push(AllocationLine::new(
                PaymentPurpose::DailyDeposit,
                amount - cfg.welfare_amount,
            ));
        }
        lines
    } else {
        vec![AllocationLine::new(PaymentPurpose::DailyDeposit, amount)]
    }
}

/// The mixed-payment cascade, in evaluation order. Reordering this slice
/// changes the policy; nothing else does.
pub fn mixed_rules() -> &'static [AllocationRule] {
    const RULES: &[AllocationRule] = &[
        AllocationRule {
            name: "registration_first",
            applies: membership_unpaid,
            split: split_registration,
        },
        AllocationRule {
            name: "loan_priority",
            applies: has_active_loan,
            split: split_loan_priority,
        },
        AllocationRule {
            name: "shares_priority",
            applies: shares_below_target,
            split: split_shares_priority,
        },
        AllocationRule {
            name: "welfare_then_savings",
            applies: always,
            split: split_welfare_or_savings,
        },
    ];
    RULES
}

/// Policy (b): decide the split for an unsolicited (bill-pay) amount from
/// the member's current state. First matching rule wins; exactly one rule
/// executes per payment.
pub fn allocate_mixed(
    snapshot: &MemberSnapshot,
    amount: f64,
    cfg: &AllocationConfig,
) -> Vec<AllocationLine> {
    if amount <= 0.0 {
        return Vec::new();
    }
    for rule in mixed_rules() {
        if (rule.applies)(snapshot, amount, cfg) {
            log::debug!(
                "allocation: member={} amount={amount} rule={}",
                snapshot.member_id,
                rule.name
            );
            let mut lines = (rule.split)(snapshot, amount, cfg);
            lines.retain(|l| l.amount > 0.0);
            return lines;
        }
    }
    unreachable!("the last cascade rule is unconditional");
}
