//! Human-readable byte size parsing and formatting.
//!
//! Ported from `byte_size_string_create`/`byte_size_string_convert` in
//! `ewftools/byte_size_string.c`: a digit-by-digit scanner rather than a
//! regex, so behavior (trailing-token tolerance, two-digit fractional
//! truncation, `i`-infix base switch) matches the original byte for byte.

use crate::error::{CoreError, Result};

/// Which family of size units a value is rendered/parsed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteBase {
    /// 1000-based (kB, MB, GB, ...).
    Decimal,
    /// 1024-based (KiB, MiB, GiB, ...).
    Binary,
}

impl ByteBase {
    fn factor(self) -> u64 {
        match self {
            ByteBase::Decimal => 1000,
            ByteBase::Binary => 1024,
        }
    }

    fn unit_suffix(self) -> &'static str {
        match self {
            ByteBase::Decimal => "B",
            ByteBase::Binary => "iB",
        }
    }
}

const PREFIXES: [&str; 9] = ["", "K", "M", "G", "T", "P", "E", "Z", "Y"];

/// Formats `bytes` using the given base, e.g. `1503238553` with
/// [`ByteBase::Binary`] renders `"1.4 GiB"`.
///
/// Errors with [`CoreError::invalid_argument`] if the value needs a factor
/// greater than 8 (i.e. > 8 YiB/YB), matching the original's
/// `factor > 8` rejection.
pub fn format_bytes(bytes: u64, base: ByteBase) -> Result<String> {
    format_bytes_locale(bytes, base, '.')
}

/// Same as [`format_bytes`] but with an explicit decimal-point character,
/// the Rust equivalent of the original's threaded `libclocale` lookup.
pub fn format_bytes_locale(bytes: u64, base: ByteBase, decimal_point: char) -> Result<String> {
    let factor = base.factor();
    let mut factored = bytes;
    let mut last_factored = bytes;
    let mut exponent: u8 = 0;

    if factored >= factor {
        while factored >= factor {
            last_factored = factored;
            factored /= factor;
            exponent += 1;
        }
    }

    if exponent > 8 {
        return Err(CoreError::invalid_argument(format!(
            "byte size {} exceeds the supported 8-YiB/8-YB range",
            bytes
        )));
    }

    let remainder = if factored < 10 && exponent > 0 {
        let remainder_raw = last_factored % factor;
        Some((remainder_raw * 100 / factor) as u8)
    } else {
        None
    };

    let prefix = PREFIXES[exponent as usize];
    // Decimal-base values under 1000 are rendered with a bare "B", never
    // "iB", matching the original's special-case for size < 1024 / MB units.
    let unit = if exponent == 0 {
        "B"
    } else {
        base.unit_suffix()
    };

    Ok(match remainder {
        Some(r) => {
            let r = r.min(9);
            format!("{}{}{} {}{}", factored, decimal_point, r, prefix, unit)
        }
        None => format!("{} {}{}", factored, prefix, unit),
    })
}

/// Parses a human-readable byte size string such as `"1.4 GiB"` or
/// `"1000 MB"`. Trailing whitespace is ignored; any other trailing token is
/// silently accepted (use [`parse_bytes_verbose`] to observe it).
pub fn parse_bytes(s: &str, decimal_point: char) -> Result<u64> {
    Ok(parse_bytes_verbose(s, decimal_point)?.0)
}

/// Like [`parse_bytes`] but also returns the unparsed trailing token, if
/// any, as a non-fatal warning the caller may choose to surface.
pub fn parse_bytes_verbose(s: &str, decimal_point: char) -> Result<(u64, Option<String>)> {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    let mut pos = 0usize;

    let mut integer_part: u64 = 0;
    let mut saw_digit = false;
    while pos < len && chars[pos].is_ascii_digit() {
        integer_part = integer_part
            .checked_mul(10)
            .and_then(|v| v.checked_add(chars[pos] as u64 - '0' as u64))
            .ok_or_else(|| CoreError::invalid_argument("byte size integer part overflowed"))?;
        saw_digit = true;
        pos += 1;
    }

    let mut remainder: Option<u8> = None;
    if pos < len && chars[pos] == decimal_point {
        pos += 1;
        let mut tenths: u8 = 0;
        let mut hundredths: u8 = 0;
        if pos < len && chars[pos].is_ascii_digit() {
            tenths = chars[pos] as u8 - b'0';
            pos += 1;
        }
        if pos < len && chars[pos].is_ascii_digit() {
            hundredths = chars[pos] as u8 - b'0';
            pos += 1;
        }
        // Ignore any further fractional digits beyond two, per the original.
        while pos < len && chars[pos].is_ascii_digit() {
            pos += 1;
        }
        remainder = Some(tenths * 10 + hundredths);
    }

    if pos < len && chars[pos] == ' ' {
        pos += 1;
    }

    if pos >= len {
        if saw_digit {
            return Err(CoreError::invalid_argument(
                "byte size string is missing a unit letter",
            ));
        }
        return Err(CoreError::invalid_argument("empty byte size string"));
    }

    let factor_exp: u8 = match chars[pos].to_ascii_lowercase() {
        'k' => 1,
        'm' => 2,
        'g' => 3,
        't' => 4,
        'p' => 5,
        'e' => 6,
        'z' => 7,
        'y' => 8,
        'b' => 0,
        _ => {
            return Err(CoreError::invalid_argument(format!(
                "invalid unit letter '{}'",
                chars[pos]
            )))
        }
    };

    // Consume the letter we just classified (K/M/G/../B).
    pos += 1;
    let mut base = ByteBase::Decimal;

    if factor_exp > 0 {
        if pos + 1 < len && chars[pos] == 'i' && chars[pos + 1] == 'B' {
            base = ByteBase::Binary;
            pos += 2;
        } else if pos < len && chars[pos] == 'B' {
            base = ByteBase::Decimal;
            pos += 1;
        } else {
            return Err(CoreError::invalid_argument(
                "byte size string is missing a unit letter",
            ));
        }
    }

    let unit_base = base.factor();
    let mut pow: u128 = 1;
    for _ in 0..factor_exp {
        pow = pow
            .checked_mul(unit_base as u128)
            .ok_or_else(|| CoreError::invalid_argument("byte size overflowed"))?;
    }

    let mut size = (integer_part as u128)
        .checked_mul(pow)
        .ok_or_else(|| CoreError::invalid_argument("byte size overflowed"))?;
    if let Some(r) = remainder {
        if r > 0 {
            size += (r as u128 * pow) / 100;
        }
    }
    let size: u64 = size
        .try_into()
        .map_err(|_| CoreError::invalid_argument("byte size overflowed"))?;

    let trailing: String = chars[pos..].iter().collect();
    let trailing = trailing.trim();
    let warning = if trailing.is_empty() {
        None
    } else {
        Some(trailing.to_string())
    };

    Ok((size, warning))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_gib() {
        assert_eq!(format_bytes(1503238553, ByteBase::Binary).unwrap(), "1.4 GiB");
    }

    #[test]
    fn format_plain_bytes_below_base() {
        assert_eq!(format_bytes(512, ByteBase::Binary).unwrap(), "512 B");
    }

    #[test]
    fn format_exact_unit() {
        assert_eq!(format_bytes(1024 * 1024, ByteBase::Binary).unwrap(), "1.0 MiB");
    }

    #[test]
    fn format_overflow_is_error() {
        // factor > 8: need > 1024^9 roughly; use a synthetic huge value via
        // repeated multiplication is not representable in u64, so exercise
        // the boundary check directly through a crafted near-max value.
        let huge = u64::MAX;
        // u64::MAX / 1024^8 is still < 10 given 1024^8 ~ 1.2e24 > u64::MAX,
        // so exponent never exceeds 8 for any u64 — confirm that instead.
        assert!(format_bytes(huge, ByteBase::Binary).is_ok());
    }

    #[test]
    fn parse_gib() {
        assert_eq!(parse_bytes("1.4 GiB", '.').unwrap(), 1_503_238_553);
    }

    #[test]
    fn parse_mb_decimal() {
        assert_eq!(parse_bytes("1000 MB", '.').unwrap(), 1_000_000_000);
    }

    #[test]
    fn parse_invalid_is_error() {
        assert!(parse_bytes("abc", '.').is_err());
    }

    #[test]
    fn parse_no_space_before_unit() {
        assert_eq!(parse_bytes("64KiB", '.').unwrap(), 64 * 1024);
    }

    #[test]
    fn parse_bare_bytes() {
        assert_eq!(parse_bytes("512B", '.').unwrap(), 512);
    }

    #[test]
    fn parse_trailing_token_is_warning_not_error() {
        let (size, warning) = parse_bytes_verbose("10 MiB extra", '.').unwrap();
        assert_eq!(size, 10 * 1024 * 1024);
        assert_eq!(warning.as_deref(), Some("extra"));
    }

    #[test]
    fn round_trip_within_precision() {
        for n in [0u64, 1, 512, 4096, 1_503_238_553, 4_000_000_000] {
            let s = format_bytes(n, ByteBase::Binary).unwrap();
            let back = parse_bytes(&s, '.').unwrap();
            if n == 0 {
                assert_eq!(back, 0);
                continue;
            }
            let diff = (n as i128 - back as i128).unsigned_abs();
            assert!(
                diff as f64 <= (n as f64) * 0.01 + 1.0,
                "n={} back={} diff={}",
                n,
                back,
                diff
            );
        }
    }
}
