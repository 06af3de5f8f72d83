//! SACCO payment core: push-payment lifecycle, webhook correlation,
//! rule-based allocation, and ledger posting over a SQLite store.
//!
//! Data flow: a dashboard (or the ops tool) asks [`api::initiate_push_payment`]
//! to create a pending request and push it to the subscriber's device; the
//! provider's asynchronous webhook lands in [`api::handle_stk_callback`],
//! which correlates it, finalizes the request, and posts the declared
//! breakdown. Unsolicited paybill payments take the synchronous
//! validation/confirmation pair in [`api`] and are split by the rule cascade
//! in [`allocation`].

pub mod allocation;
pub mod api;
pub mod billpay;
pub mod callback;
pub mod config;
pub mod error;
pub mod fines;
pub mod gateway;
pub mod phone;
pub mod probe;
pub mod request_factory;
pub mod store;
pub mod types;
