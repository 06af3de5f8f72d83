//! sacco-ops: headless operations console for the SACCO payment core.
//!
//! Usage:
//!   sacco-ops --db sacco.db init
//!   sacco-ops --db sacco.db register --name "Jane W" --phone 0712345678 --id-no 12345678
//!   sacco-ops --db sacco.db push --member <id> --phone 0712345678 --deposit 100 --shares 400
//!   sacco-ops --db sacco.db callback --file payload.json
//!   sacco-ops --db sacco.db validate --msisdn 254712345678 --ref tps0001
//!   sacco-ops --db sacco.db confirm --ref tps0001 --amount 1200 --trans-id QK12ZX9T
//!   sacco-ops --db sacco.db fines --date 2025-11-03
//!
//! The push command needs the MPESA_* environment variables (consumer key
//! and secret, shortcode, passkey, callback URL).

use anyhow::{bail, Context, Result};
use sacco_core::{
    allocation::{Breakdown, LoanRepaymentPart},
    api::{
        self, BillPayConfirmationRequest, BillPayValidationRequest, PushInitiationRequest,
    },
    config::{AllocationConfig, GatewayConfig},
    fines,
    gateway::DarajaGateway,
    store::{MemberRow, SaccoStore},
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = str_arg(&args, "--db").unwrap_or_else(|| "sacco.db".to_string());
    let command = first_positional(&args).unwrap_or_else(|| "help".to_string());

    let mut store = SaccoStore::open(&db)?;
    store.migrate()?;

    match command.as_str() {
        "init" => {
            println!("database ready at {db}");
        }
        "register" => {
            let name = str_arg(&args, "--name").context("--name is required")?;
            let id_no = str_arg(&args, "--id-no").context("--id-no is required")?;
            let phone = str_arg(&args, "--phone");
            let prefix = store
                .get_setting("member_no_prefix")?
                .unwrap_or_else(|| "TPS".to_string());
            let member_no = store.next_member_no(&prefix)?;
            let member = MemberRow {
                id: uuid_v4(),
                member_no: member_no.clone(),
                user_name: name,
                phone,
                id_no: Some(id_no.clone()),
                email: Some(format!("{id_no}@sacco.local")),
                status: "active".into(),
                created_at: chrono::Utc::now(),
            };
            store.insert_member(&member)?;
            println!("registered {member_no} ({})", member.id);
        }
        "push" => {
            let member_id = str_arg(&args, "--member").context("--member is required")?;
            let phone = str_arg(&args, "--phone").context("--phone is required")?;
            let breakdown = breakdown_from_args(&args)?;
            let total = breakdown.total();
            if total <= 0.0 {
                bail!("no amounts given; use --deposit/--shares/--welfare/--membership/--loan");
            }
            let gateway = DarajaGateway::new(GatewayConfig::from_env()?)?;
            let req = PushInitiationRequest {
                phone,
                total,
                member_id,
                breakdown,
                payment_for: str_arg(&args, "--for"),
                related_id: None,
            };
            let resp = api::initiate_push_payment(&mut store, &gateway, &req);
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        "callback" => {
            let file = str_arg(&args, "--file").context("--file is required")?;
            let raw: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(&file)?)
                    .with_context(|| format!("parsing {file}"))?;
            let ack = api::handle_stk_callback(&mut store, &raw);
            println!("{}", serde_json::to_string_pretty(&ack)?);
        }
        "validate" => {
            let req = BillPayValidationRequest {
                msisdn: str_arg(&args, "--msisdn").context("--msisdn is required")?,
                bill_ref_number: str_arg(&args, "--ref").context("--ref is required")?,
            };
            let resp = api::handle_billpay_validation(&store, &req);
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        "confirm" => {
            let cfg = AllocationConfig::load(&store)?;
            let req = BillPayConfirmationRequest {
                bill_ref_number: str_arg(&args, "--ref").context("--ref is required")?,
                amount: num_arg(&args, "--amount").context("--amount is required")?,
                trans_id: str_arg(&args, "--trans-id").context("--trans-id is required")?,
                phone: str_arg(&args, "--phone"),
                payment_date: str_arg(&args, "--date"),
            };
            let resp = api::handle_billpay_confirmation(&mut store, &cfg, &req);
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        "deposit" => {
            let member_id = str_arg(&args, "--member").context("--member is required")?;
            let amount = num_arg(&args, "--amount").context("--amount is required")?;
            let date = str_arg(&args, "--date")
                .unwrap_or_else(|| chrono::Utc::now().date_naive().to_string());
            store.insert_daily_deposit(&member_id, amount, &date)?;
            println!("recorded deposit of {amount} for {member_id} on {date}");
        }
        "fines" => {
            let cfg = AllocationConfig::load(&store)?;
            let date = str_arg(&args, "--date")
                .unwrap_or_else(|| chrono::Utc::now().date_naive().to_string());
            let summary = fines::apply_daily_savings_fines(&store, &cfg, &date)?;
            println!(
                "fines for {date}: checked {} members, applied {}",
                summary.members_checked, summary.fines_applied
            );
        }
        _ => {
            println!("commands: init | register | push | callback | validate | confirm | deposit | fines");
        }
    }

    Ok(())
}

/// First argument that is neither a `--flag` nor a flag's value.
fn first_positional(args: &[String]) -> Option<String> {
    let mut i = 1;
    while i < args.len() {
        if args[i].starts_with("--") {
            i += 2;
        } else {
            return Some(args[i].clone());
        }
    }
    None
}

fn str_arg(args: &[String], name: &str) -> Option<String> {
    args.windows(2)
        .find(|w| w[0] == name)
        .map(|w| w[1].clone())
}

fn num_arg(args: &[String], name: &str) -> Option<f64> {
    str_arg(args, name).and_then(|v| v.parse().ok())
}

fn breakdown_from_args(args: &[String]) -> Result<Breakdown> {
    let mut breakdown = Breakdown {
        daily_deposit: num_arg(args, "--deposit").unwrap_or(0.0),
        shares: num_arg(args, "--shares").unwrap_or(0.0),
        welfare: num_arg(args, "--welfare").unwrap_or(0.0),
        membership: num_arg(args, "--membership").unwrap_or(0.0),
        loan_repayment: None,
    };
    if let Some(pair) = str_arg(args, "--loan") {
        // --loan <loan-id>:<amount>
        let (loan_id, amount) = pair
            .split_once(':')
            .context("--loan expects <loan-id>:<amount>")?;
        breakdown.loan_repayment = Some(LoanRepaymentPart {
            loan_id: Some(loan_id.to_string()),
            amount: amount.parse().context("--loan amount must be numeric")?,
        });
    }
    Ok(breakdown)
}

fn uuid_v4() -> String {
    uuid::Uuid::new_v4().to_string()
}
