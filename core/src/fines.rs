//! Daily savings fines sweep.
//!
//! Every active member is expected to make a daily deposit; the sweep fines
//! those who made none on the given date. Reruns for the same date are
//! no-ops (one fine per member per day, enforced by the store). The outcome
//! is recorded in the activity log for reconciliation.

use crate::{
    config::AllocationConfig,
    error::SaccoResult,
    store::{ActivityEntry, SaccoStore},
};

pub const FINES_JOB_NAME: &str = "daily_savings_fine_job";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinesSummary {
    pub members_checked: usize,
    pub fines_applied: usize,
}

/// Fine every active member without a deposit on `date` (YYYY-MM-DD).
pub fn apply_daily_savings_fines(
    store: &SaccoStore,
    cfg: &AllocationConfig,
    date: &str,
) -> SaccoResult<FinesSummary> {
    let members = store.active_members()?;
    let mut applied = 0usize;

    for member in &members {
        if store.has_deposit_on(&member.id, date)? {
            continue;
        }
        if store.insert_savings_fine(&member.id, cfg.savings_fine_amount, date)? {
            applied += 1;
            log::debug!(
                "fines: {} fined {} for {date}",
                member.member_no,
                cfg.savings_fine_amount
            );
        }
    }

    let summary = FinesSummary {
        members_checked: members.len(),
        fines_applied: applied,
    };
    store.log_activity(&ActivityEntry {
        job_name: FINES_JOB_NAME.into(),
        activity_type: "apply_fines".into(),
        related_table: Some("deductions".into()),
        related_id: None,
        details: serde_json::json!({
            "date": date,
            "members_checked": summary.members_checked,
            "fines_applied": summary.fines_applied,
        }),
        status: "success".into(),
    })?;
    log::info!(
        "fines: {date} checked {} members, applied {} fines",
        summary.members_checked,
        summary.fines_applied
    );
    Ok(summary)
}
