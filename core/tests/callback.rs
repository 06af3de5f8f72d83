//! Settlement-callback tests: correlation, shape tolerance, the one-shot
//! status transition, replay handling, and allocation of the declared
//! breakdown.

use chrono::{TimeZone, Utc};
use sacco_core::{
    allocation::{Breakdown, LoanRepaymentPart},
    api,
    callback::{process_callback, CallbackOutcome},
    request_factory::create_or_reuse_request,
    store::{LoanRow, MemberRow, SaccoStore},
    types::{PaymentPurpose, RequestStatus},
};
use serde_json::{json, Value};

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

/// Create a pending request with the given breakdown and attach a
/// correlation id, as the push-initiation path would.
fn pending_request(store: &SaccoStore, correlation: &str, amount: f64, breakdown: Breakdown, purpose: PaymentPurpose) -> String {
    let row = create_or_reuse_request(
        store, "m1", amount, "0712345678", purpose, None, breakdown,
    )
    .expect("create request");
    assert!(store.set_correlation_id(&row.id, correlation).unwrap());
    row.id
}

fn success_payload(correlation: &str, amount: f64, receipt: &str) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": correlation,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        {"Name": "Amount", "Value": amount},
                        {"Name": "MpesaReceiptNumber", "Value": receipt},
                        {"Name": "TransactionDate", "Value": 20250311143022u64},
                        {"Name": "PhoneNumber", "Value": 254712345678u64}
                    ]
                }
            }
        }
    })
}

/// Push for 500 with a pure daily-deposit breakdown settles into exactly one
/// settled payment and one DailyDeposit ledger line.
#[test]
fn deposit_breakdown_settles_into_one_ledger_line() {
    let mut store = setup();
    let breakdown = Breakdown { daily_deposit: 500.0, ..Default::default() };
    pending_request(&store, "ws_CO_1", 500.0, breakdown, PaymentPurpose::DailyDeposit);

    let outcome = process_callback(&mut store, &success_payload("ws_CO_1", 500.0, "QK12ZX9T01")).unwrap();
    assert_eq!(outcome, CallbackOutcome::Processed(RequestStatus::Success));

    assert_eq!(store.settled_payment_count().unwrap(), 1);
    let payment = &store.settled_payments_for_correlation("ws_CO_1").unwrap()[0];
    assert_eq!(payment.amount, 500.0);
    assert_eq!(payment.status, RequestStatus::Success);
    assert_eq!(payment.receipt.as_deref(), Some("QK12ZX9T01"));
    assert_eq!(payment.payment_for, Some(PaymentPurpose::DailyDeposit));
    assert_eq!(
        payment.transaction_date,
        Some(Utc.with_ymd_and_hms(2025, 3, 11, 14, 30, 22).unwrap())
    );

    let ledger = store.ledger_entries_for_payment(&payment.id).unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].payment_for, "DailyDeposit");
    assert_eq!(ledger[0].amount, 500.0);
    assert_eq!(store.daily_deposit_total("m1").unwrap(), 500.0);
}

/// Full repayment drives the loan to zero balance and `Repaid`, with the
/// loan id carried on the ledger line.
#[test]
fn full_loan_repayment_marks_the_loan_repaid() {
    let mut store = setup();
    store
        .insert_loan(&LoanRow {
            id: "L1".into(),
            member_id: "m1".into(),
            principal: 1000.0,
            loan_balance: 1000.0,
            paid_amount: 0.0,
            status: "Active".into(),
            approved_date: "2025-01-10".into(),
            created_at: Utc::now(),
        })
        .unwrap();
    let breakdown = Breakdown {
        loan_repayment: Some(LoanRepaymentPart { loan_id: Some("L1".into()), amount: 1000.0 }),
        ..Default::default()
    };
    pending_request(&store, "ws_CO_2", 1000.0, breakdown, PaymentPurpose::LoanRepayment);

    process_callback(&mut store, &success_payload("ws_CO_2", 1000.0, "QK12ZX9T02")).unwrap();

    let loan = store.loan_by_id("L1").unwrap().unwrap();
    assert_eq!(loan.loan_balance, 0.0);
    assert_eq!(loan.paid_amount, 1000.0);
    assert_eq!(loan.status, "Repaid");

    let payment = &store.settled_payments_for_correlation("ws_CO_2").unwrap()[0];
    let ledger = store.ledger_entries_for_payment(&payment.id).unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].payment_for, "LoanRepayment");
    assert_eq!(ledger[0].related_id.as_deref(), Some("L1"));
}

/// The correlator must accept the flat payload shape some provider versions
/// send (no Body.stkCallback envelope, lowercase keys).
#[test]
fn flat_lowercase_payload_shape_is_tolerated() {
    let mut store = setup();
    let breakdown = Breakdown { daily_deposit: 250.0, ..Default::default() };
    pending_request(&store, "ws_CO_3", 250.0, breakdown, PaymentPurpose::DailyDeposit);

    let payload = json!({
        "resultCode": 0,
        "resultDesc": "ok",
        "checkoutRequestID": "ws_CO_3",
        "Amount": 250.0,
        "MpesaReceiptNumber": "QK12ZX9T03"
    });
    let outcome = process_callback(&mut store, &payload).unwrap();
    assert_eq!(outcome, CallbackOutcome::Processed(RequestStatus::Success));
    assert_eq!(store.settled_payment_count().unwrap(), 1);
}

/// A failed settlement records the payment but posts nothing.
#[test]
fn failed_settlement_creates_no_ledger_entries() {
    let mut store = setup();
    let breakdown = Breakdown { daily_deposit: 500.0, ..Default::default() };
    let request_id =
        pending_request(&store, "ws_CO_4", 500.0, breakdown, PaymentPurpose::DailyDeposit);

    let payload = json!({
        "Body": {"stkCallback": {
            "CheckoutRequestID": "ws_CO_4",
            "ResultCode": 1032,
            "ResultDesc": "Request cancelled by user"
        }}
    });
    let outcome = process_callback(&mut store, &payload).unwrap();
    assert_eq!(outcome, CallbackOutcome::Processed(RequestStatus::Failed));

    let request = store.request_by_id(&request_id).unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Failed);
    assert_eq!(store.settled_payment_count().unwrap(), 1);
    assert_eq!(store.ledger_count().unwrap(), 0);
    assert_eq!(store.daily_deposit_total("m1").unwrap(), 0.0);

    // Failure payloads carry no metadata; the amount falls back to the request's.
    let payment = &store.settled_payments_for_correlation("ws_CO_4").unwrap()[0];
    assert_eq!(payment.amount, 500.0);
    assert!(payment.receipt.is_none());
    assert!(payment.transaction_date.is_none());
}

/// At-least-once delivery: the identical callback replayed after
/// finalization must not create a second settled payment or more ledger rows.
#[test]
fn replayed_callback_is_a_no_op() {
    let mut store = setup();
    let breakdown = Breakdown { daily_deposit: 500.0, ..Default::default() };
    pending_request(&store, "ws_CO_5", 500.0, breakdown, PaymentPurpose::DailyDeposit);

    let payload = success_payload("ws_CO_5", 500.0, "QK12ZX9T05");
    assert_eq!(
        process_callback(&mut store, &payload).unwrap(),
        CallbackOutcome::Processed(RequestStatus::Success)
    );
    assert_eq!(
        process_callback(&mut store, &payload).unwrap(),
        CallbackOutcome::Replay
    );

    assert_eq!(store.settled_payment_count().unwrap(), 1);
    assert_eq!(store.ledger_count().unwrap(), 1);
    assert_eq!(store.daily_deposit_total("m1").unwrap(), 500.0);
}

/// Malformed payload without any correlation id: the handler acknowledges
/// with the soft-failure code and writes nothing.
#[test]
fn missing_correlation_id_is_acknowledged_not_processed() {
    let mut store = setup();
    let ack = api::handle_stk_callback(&mut store, &json!({"Body": {"stkCallback": {"ResultCode": 0}}}));
    assert_eq!(ack.result_code, 1);
    assert_eq!(store.settled_payment_count().unwrap(), 0);
}

/// A correlation id that matches no request (expired or foreign) is logged
/// and acknowledged; retrying would never help.
#[test]
fn unknown_correlation_id_is_acknowledged_not_processed() {
    let mut store = setup();
    let ack = api::handle_stk_callback(
        &mut store,
        &success_payload("ws_CO_unknown", 100.0, "QK12ZX9T06"),
    );
    assert_eq!(ack.result_code, 1);
    assert_eq!(store.settled_payment_count().unwrap(), 0);
}

/// The provider-facing wrapper acknowledges success with code 0.
#[test]
fn processed_callback_acknowledges_with_code_zero() {
    let mut store = setup();
    let breakdown = Breakdown { daily_deposit: 120.0, ..Default::default() };
    pending_request(&store, "ws_CO_7", 120.0, breakdown, PaymentPurpose::DailyDeposit);

    let ack = api::handle_stk_callback(&mut store, &success_payload("ws_CO_7", 120.0, "QK12ZX9T07"));
    assert_eq!(ack.result_code, 0);
    assert_eq!(ack.result_desc, "Accepted");
}

/// A purpose tag outside the allow-list is stored as a null purpose.
#[test]
fn mixed_purpose_tag_is_not_carried_onto_the_settled_payment() {
    let mut store = setup();
    let breakdown = Breakdown { daily_deposit: 200.0, ..Default::default() };
    pending_request(&store, "ws_CO_8", 200.0, breakdown, PaymentPurpose::MixedPayment);

    process_callback(&mut store, &success_payload("ws_CO_8", 200.0, "QK12ZX9T08")).unwrap();
    let payment = &store.settled_payments_for_correlation("ws_CO_8").unwrap()[0];
    assert_eq!(payment.payment_for, None);
}

/// A loan-repayment slice with no target loan id is rerouted into the
/// DailyDeposit line instead of being dropped.
#[test]
fn loan_slice_without_target_reroutes_to_daily_deposit() {
    let mut store = setup();
    let breakdown = Breakdown {
        daily_deposit: 100.0,
        loan_repayment: Some(LoanRepaymentPart { loan_id: None, amount: 400.0 }),
        ..Default::default()
    };
    pending_request(&store, "ws_CO_9", 500.0, breakdown, PaymentPurpose::MixedPayment);

    process_callback(&mut store, &success_payload("ws_CO_9", 500.0, "QK12ZX9T09")).unwrap();

    let payment = &store.settled_payments_for_correlation("ws_CO_9").unwrap()[0];
    let ledger = store.ledger_entries_for_payment(&payment.id).unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].payment_for, "DailyDeposit");
    assert_eq!(ledger[0].amount, 500.0);
    let total: f64 = ledger.iter().map(|l| l.amount).sum();
    assert_eq!(total, payment.amount);
}

/// An unparseable transaction date is stored as null, never an error.
#[test]
fn bad_transaction_date_degrades_to_null() {
    let mut store = setup();
    let breakdown = Breakdown { daily_deposit: 300.0, ..Default::default() };
    pending_request(&store, "ws_CO_10", 300.0, breakdown, PaymentPurpose::DailyDeposit);

    let payload = json!({
        "Body": {"stkCallback": {
            "CheckoutRequestID": "ws_CO_10",
            "ResultCode": 0,
            "ResultDesc": "ok",
            "CallbackMetadata": {"Item": [
                {"Name": "Amount", "Value": 300.0},
                {"Name": "TransactionDate", "Value": "not-a-date"}
            ]}
        }}
    });
    process_callback(&mut store, &payload).unwrap();
    let payment = &store.settled_payments_for_correlation("ws_CO_10").unwrap()[0];
    assert!(payment.transaction_date.is_none());
}

/// Multi-category breakdown: applied ledger amounts sum to the settled
/// amount, one line per touched category.
#[test]
fn multi_category_breakdown_sums_to_the_settled_amount() {
    let mut store = setup();
    store
        .insert_loan(&LoanRow {
            id: "L2".into(),
            member_id: "m1".into(),
            principal: 5000.0,
            loan_balance: 5000.0,
            paid_amount: 0.0,
            status: "Active".into(),
            approved_date: "2025-02-01".into(),
            created_at: Utc::now(),
        })
        .unwrap();
    let breakdown = Breakdown {
        daily_deposit: 100.0,
        loan_repayment: Some(LoanRepaymentPart { loan_id: Some("L2".into()), amount: 400.0 }),
        shares: 250.0,
        welfare: 200.0,
        membership: 1000.0,
    };
    pending_request(&store, "ws_CO_11", 1950.0, breakdown, PaymentPurpose::MixedPayment);

    process_callback(&mut store, &success_payload("ws_CO_11", 1950.0, "QK12ZX9T11")).unwrap();

    let payment = &store.settled_payments_for_correlation("ws_CO_11").unwrap()[0];
    let ledger = store.ledger_entries_for_payment(&payment.id).unwrap();
    assert_eq!(ledger.len(), 5);
    let total: f64 = ledger.iter().map(|l| l.amount).sum();
    assert!((total - 1950.0).abs() < 1e-9);
}
