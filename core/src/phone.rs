//! Subscriber-number normalization for the mobile-money provider.
//!
//! The provider only accepts digits-only numbers in the national
//! `254XXXXXXXXX` form. Members type numbers as `07XX...`, `+2547XX...` or
//! already-normalized; everything else must be rejected before the gateway
//! is contacted.

/// Normalize a raw phone string to `254XXXXXXXXX` form.
///
/// The result is not guaranteed valid. Callers gate on [`is_valid_msisdn`]
/// and abort before any provider call when it fails.
pub fn normalize_msisdn(raw: &str) -> String {
    let mut p: String = raw.trim().chars().filter(|c| c.is_ascii_digit()).collect();
    if p.starts_with('0') {
        p = format!("254{}", &p[1..]);
    } else if p.len() == 9 && p.starts_with('7') {
        // bare subscriber form: 7XXXXXXXX
        p = format!("254{p}");
    }
    p
}

/// `^254\d{9}$`, the form required by the push-payment API.
pub fn is_valid_msisdn(p: &str) -> bool {
    p.len() == 12 && p.starts_with("254") && p.chars().all(|c| c.is_ascii_digit())
}

/// The stricter form the provider sends on bill-pay validation requests:
/// a Safaricom subscriber (`2547` + 8 digits), no normalization applied.
pub fn is_valid_c2b_msisdn(p: &str) -> bool {
    p.len() == 12 && p.starts_with("2547") && p.chars().all(|c| c.is_ascii_digit())
}
