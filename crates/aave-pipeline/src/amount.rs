use alloy::primitives::U256;
use eyre::Context as _;

/// Parse a decimal string ("0.02") into smallest units of a token with `decimals` places.
///
/// Never goes through floating point; excess fractional digits are rejected instead of rounded.
pub fn parse_units(s: &str, decimals: u8) -> eyre::Result<U256> {
    let s = s.trim();
    if s.is_empty() {
        eyre::bail!("empty amount");
    }
    if s.starts_with('-') {
        eyre::bail!("amount must be non-negative");
    }

    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    if whole.is_empty() && frac.is_empty() {
        eyre::bail!("empty amount");
    }
    if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        eyre::bail!("amount must be a decimal number: {s}");
    }
    if frac.len() > usize::from(decimals) {
        eyre::bail!("too many decimal places for token (decimals={decimals})");
    }

    let whole_v = if whole.is_empty() {
        U256::ZERO
    } else {
        whole.parse::<U256>().context("parse whole")?
    };
    let mut frac_s = frac.to_owned();
    while frac_s.len() < usize::from(decimals) {
        frac_s.push('0');
    }
    let frac_v = if frac_s.is_empty() {
        U256::ZERO
    } else {
        frac_s.parse::<U256>().context("parse fractional")?
    };

    pow10(decimals)
        .and_then(|scale| whole_v.checked_mul(scale))
        .and_then(|x| x.checked_add(frac_v))
        .ok_or_else(|| eyre::eyre!("amount overflow"))
}

/// Format smallest units as a decimal string without floats.
///
/// - base=20000000000000000, decimals=18 => "0.02"
/// - base=1, decimals=6 => "0.000001"
pub fn format_units(base: U256, decimals: u8) -> String {
    if decimals == 0 {
        return base.to_string();
    }
    let Some(scale) = pow10(decimals) else {
        return base.to_string();
    };
    let whole = base / scale;
    let frac = base % scale;
    if frac.is_zero() {
        return whole.to_string();
    }
    let mut frac_s = format!("{frac:0>width$}", frac = frac.to_string(), width = usize::from(decimals));
    while frac_s.ends_with('0') {
        frac_s.pop();
    }
    format!("{whole}.{frac_s}")
}

/// `10^exp` as a `U256`, or `None` when it does not fit.
pub fn pow10(exp: u8) -> Option<U256> {
    U256::from(10_u64).checked_pow(U256::from(exp))
}

/// Serialize `U256` as a plain decimal string in reports.
pub mod dec_string {
    use alloy::primitives::U256;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(v: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }
}
