//! Bill-pay (C2B) tests: the validation/confirmation protocol, rule-based
//! allocation against live member state, and replay protection by receipt.

use chrono::Utc;
use sacco_core::{
    api::{
        self, BillPayConfirmationRequest, BillPayValidationRequest, C2bResultCode,
    },
    config::AllocationConfig,
    store::{LoanRow, MemberRow, SaccoStore, SettledPaymentRow},
    types::{PaymentPurpose, RequestStatus},
};

fn setup() -> SaccoStore {
    let store = SaccoStore::in_memory().expect("open store");
    store.migrate().expect("migrate");
    store
        .insert_member(&MemberRow {
            id: "m1".into(),
            member_no: "TPS-0001".into(),
            user_name: "Jane Wanjiku".into(),
            phone: Some("254712345678".into()),
            id_no: None,
            email: None,
            status: "active".into(),
            created_at: Utc::now(),
        })
        .expect("seed member");
    store
}

fn cfg() -> AllocationConfig {
    AllocationConfig::default_test()
}

fn mark_membership_paid(store: &mut SaccoStore) {
    // Paying the registration fee through the poster flips the member to paid.
    let payment = SettledPaymentRow {
        id: "seed-membership".into(),
        correlation_id: None,
        merchant_request_id: None,
        receipt: Some("SEEDRECEIPT".into()),
        phone: None,
        amount: 1000.0,
        transaction_date: None,
        status: RequestStatus::Success,
        payment_for: Some(PaymentPurpose::Membership),
        related_id: None,
        raw_payload: "{}".into(),
        created_at: Utc::now(),
    };
    store.insert_settled_payment(&payment).unwrap();
    store
        .post_allocation(
            &payment,
            "m1",
            &[sacco_core::allocation::AllocationLine {
                purpose: PaymentPurpose::Membership,
                amount: 1000.0,
                related_id: None,
            }],
        )
        .unwrap();
}

fn confirmation(trans_id: &str, amount: f64) -> BillPayConfirmationRequest {
    BillPayConfirmationRequest {
        bill_ref_number: "tps0001".into(),
        amount,
        trans_id: trans_id.into(),
        phone: Some("254712345678".into()),
        payment_date: Some("20250311143022".into()),
    }
}

// ── Validation phase ───────────────────────────────────────────

#[test]
fn known_member_is_accepted() {
    let store = setup();
    let resp = api::handle_billpay_validation(
        &store,
        &BillPayValidationRequest {
            msisdn: "254712345678".into(),
            bill_ref_number: "tps0001".into(),
        },
    );
    assert_eq!(resp.result_code, C2bResultCode::Accepted(0));
    assert_eq!(resp.result_desc, "Accepted");
}

#[test]
fn malformed_subscriber_number_is_rejected_with_the_subscriber_code() {
    let store = setup();
    for msisdn in ["0712345678", "254112345678", "2547123456", ""] {
        let resp = api::handle_billpay_validation(
            &store,
            &BillPayValidationRequest {
                msisdn: msisdn.into(),
                bill_ref_number: "tps0001".into(),
            },
        );
        assert_eq!(resp.result_code, C2bResultCode::Rejected("C2B00011"), "for {msisdn:?}");
    }
}

#[test]
fn unknown_or_empty_account_reference_is_rejected_with_the_account_code() {
    let store = setup();
    for bill_ref in ["tps9999", "!!", ""] {
        let resp = api::handle_billpay_validation(
            &store,
            &BillPayValidationRequest {
                msisdn: "254712345678".into(),
                bill_ref_number: bill_ref.into(),
            },
        );
        assert_eq!(resp.result_code, C2bResultCode::Rejected("C2B00012"), "for {bill_ref:?}");
    }
}

// ── Confirmation phase: rule-based allocation ──────────────────

/// New member, amount above the registration fee: fee to Membership, the
/// rest to Shares.
#[test]
fn unpaid_membership_takes_the_fee_then_shares() {
    let mut store = setup();
    let resp = api::handle_billpay_confirmation(&mut store, &cfg(), &confirmation("TX0001", 1200.0));
    assert_eq!(resp.result_code, "0");

    let payment = store.settled_payment_by_receipt("TX0001").unwrap().unwrap();
    assert_eq!(payment.payment_for, Some(PaymentPurpose::MixedPayment));
    assert_eq!(payment.related_id.as_deref(), Some("m1"));

    let ledger = store.ledger_entries_for_payment(&payment.id).unwrap();
    let amount_for = |cat: &str| {
        ledger
            .iter()
            .find(|l| l.payment_for == cat)
            .map(|l| l.amount)
    };
    assert_eq!(amount_for("Membership"), Some(1000.0));
    assert_eq!(amount_for("Shares"), Some(200.0));
    assert_eq!(ledger.len(), 2);

    // Domain state followed the ledger.
    let snapshot = store.member_snapshot("m1").unwrap();
    assert!(snapshot.membership_paid);
    assert_eq!(snapshot.shares_total, 200.0);
}

/// Paid-up member with an active loan: fixed daily deposit first, the rest
/// against the oldest active loan.
#[test]
fn active_loan_takes_deposit_then_repayment() {
    let mut store = setup();
    mark_membership_paid(&mut store);
    store
        .insert_loan(&LoanRow {
            id: "L-old".into(),
            member_id: "m1".into(),
            principal: 5000.0,
            loan_balance: 5000.0,
            paid_amount: 0.0,
            status: "Active".into(),
            approved_date: "2025-01-10".into(),
            created_at: Utc::now(),
        })
        .unwrap();
    store
        .insert_loan(&LoanRow {
            id: "L-new".into(),
            member_id: "m1".into(),
            principal: 8000.0,
            loan_balance: 8000.0,
            paid_amount: 0.0,
            status: "Active".into(),
            approved_date: "2025-06-01".into(),
            created_at: Utc::now(),
        })
        .unwrap();

    let resp = api::handle_billpay_confirmation(&mut store, &cfg(), &confirmation("TX0002", 300.0));
    assert_eq!(resp.result_code, "0");

    let payment = store.settled_payment_by_receipt("TX0002").unwrap().unwrap();
    let ledger = store.ledger_entries_for_payment(&payment.id).unwrap();
    assert_eq!(ledger.len(), 2);

    let repay = ledger.iter().find(|l| l.payment_for == "LoanRepayment").unwrap();
    assert_eq!(repay.amount, 200.0);
    assert_eq!(repay.related_id.as_deref(), Some("L-old"));
    let deposit = ledger.iter().find(|l| l.payment_for == "DailyDeposit").unwrap();
    assert_eq!(deposit.amount, 100.0);

    let old_loan = store.loan_by_id("L-old").unwrap().unwrap();
    assert_eq!(old_loan.loan_balance, 4800.0);
    let new_loan = store.loan_by_id("L-new").unwrap().unwrap();
    assert_eq!(new_loan.loan_balance, 8000.0);
}

/// Shares target met, no loan, welfare unpaid: welfare gets its fixed
/// amount, the remainder goes to savings.
#[test]
fn welfare_branch_applies_after_shares_target() {
    let mut store = setup();
    mark_membership_paid(&mut store);
    // Push the member past the shares target through the normal posting path.
    let resp = api::handle_billpay_confirmation(&mut store, &cfg(), &confirmation("TX0003", 12_100.0));
    assert_eq!(resp.result_code, "0");
    assert!(store.shares_total("m1").unwrap() >= 12_000.0);

    let resp = api::handle_billpay_confirmation(&mut store, &cfg(), &confirmation("TX0004", 500.0));
    assert_eq!(resp.result_code, "0");

    let payment = store.settled_payment_by_receipt("TX0004").unwrap().unwrap();
    let ledger = store.ledger_entries_for_payment(&payment.id).unwrap();
    let welfare = ledger.iter().find(|l| l.payment_for == "Welfare").unwrap();
    assert_eq!(welfare.amount, 200.0);
    let deposit = ledger.iter().find(|l| l.payment_for == "DailyDeposit").unwrap();
    assert_eq!(deposit.amount, 300.0);
    assert_eq!(store.welfare_count("m1").unwrap(), 1);
}

/// Same TransID delivered twice: acknowledged both times, inserted once.
#[test]
fn duplicate_transaction_id_is_acknowledged_without_reinsertion() {
    let mut store = setup();
    let req = confirmation("TX0005", 1200.0);
    assert_eq!(api::handle_billpay_confirmation(&mut store, &cfg(), &req).result_code, "0");
    let payments_before = store.settled_payment_count().unwrap();
    let ledger_before = store.ledger_count().unwrap();

    assert_eq!(api::handle_billpay_confirmation(&mut store, &cfg(), &req).result_code, "0");
    assert_eq!(store.settled_payment_count().unwrap(), payments_before);
    assert_eq!(store.ledger_count().unwrap(), ledger_before);
}

/// Confirmation for a member that cannot be resolved fails softly with the
/// protocol code, not an error.
#[test]
fn unresolvable_member_fails_with_the_protocol_code() {
    let mut store = setup();
    let mut req = confirmation("TX0006", 500.0);
    req.bill_ref_number = "tps9999".into();
    let resp = api::handle_billpay_confirmation(&mut store, &cfg(), &req);
    assert_eq!(resp.result_code, "1");
    assert_eq!(resp.result_desc, "Failed");
    assert_eq!(store.settled_payment_count().unwrap(), 0);
}

/// Identical state and amount must allocate identically on repeat (with
/// distinct receipts): the cascade is deterministic.
#[test]
fn rule_based_allocation_is_deterministic_for_identical_state() {
    let store_a = {
        let mut s = setup();
        api::handle_billpay_confirmation(&mut s, &cfg(), &confirmation("TXA", 1500.0));
        s
    };
    let store_b = {
        let mut s = setup();
        api::handle_billpay_confirmation(&mut s, &cfg(), &confirmation("TXB", 1500.0));
        s
    };
    let ledger_a = {
        let p = store_a.settled_payment_by_receipt("TXA").unwrap().unwrap();
        store_a.ledger_entries_for_payment(&p.id).unwrap()
    };
    let ledger_b = {
        let p = store_b.settled_payment_by_receipt("TXB").unwrap().unwrap();
        store_b.ledger_entries_for_payment(&p.id).unwrap()
    };
    let shape =
        |l: &[sacco_core::store::LedgerEntryRow]| -> Vec<(String, f64)> {
            l.iter().map(|e| (e.payment_for.clone(), e.amount)).collect()
        };
    assert_eq!(shape(&ledger_a), shape(&ledger_b));
}
