//! Kennitala (Icelandic national id) and phone number helpers.
//!
//! Storage form is digits only (`0101302989`, `5551234`). Phones are shown as
//! `555-1234`; kennitalas are only ever shown masked.

/// Mod-11 weights for the first eight kennitala digits.
const KENNITALA_WEIGHTS: [u32; 8] = [3, 2, 7, 6, 5, 4, 3, 2];
const ICELAND_COUNTRY_CODE: &str = "354";

/// Strip whitespace and hyphens. Invalid input is returned stripped, not rejected.
#[must_use]
pub fn normalize_kennitala(kennitala: &str) -> String {
    kennitala
        .trim()
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .collect()
}

/// Validate format, date ranges, century digit and the mod-11 check digit.
#[must_use]
pub fn validate_kennitala(kennitala: &str) -> bool {
    let kt = normalize_kennitala(kennitala);
    if kt.len() != 10 || !kt.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let digits: Vec<u32> = kt.chars().filter_map(|c| c.to_digit(10)).collect();

    let day = digits[0] * 10 + digits[1];
    let month = digits[2] * 10 + digits[3];
    if !(1..=12).contains(&month) {
        return false;
    }

    // Companies add 40 to the day.
    let actual_day = if day > 31 { day.saturating_sub(40) } else { day };
    if !(1..=31).contains(&actual_day) {
        return false;
    }

    if !matches!(digits[9], 0 | 8 | 9) {
        return false;
    }

    let total: u32 = digits
        .iter()
        .zip(KENNITALA_WEIGHTS.iter())
        .map(|(digit, weight)| digit * weight)
        .sum();
    let remainder = total % 11;
    let check_digit = if remainder == 0 { 0 } else { 11 - remainder };
    if check_digit == 10 {
        return false;
    }

    check_digit == digits[8]
}

/// Log-safe form: birth date part only, `DDMMYY****`.
#[must_use]
pub fn mask_kennitala(kennitala: &str) -> String {
    let normalized = normalize_kennitala(kennitala);
    let prefix: String = normalized.chars().take(6).collect();
    format!("{prefix}****")
}

/// Normalize to seven digits, dropping a `+354`/`00354` prefix.
/// Returns `None` for empty input and the trimmed original when invalid.
#[must_use]
pub fn normalize_phone(phone: &str) -> Option<String> {
    let trimmed = phone.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if let Some(rest) = digits.strip_prefix("00") {
        digits = rest.to_string();
    }
    if digits.len() == 10 && digits.starts_with(ICELAND_COUNTRY_CODE) {
        digits = digits[ICELAND_COUNTRY_CODE.len()..].to_string();
    }

    if digits.len() == 7 {
        Some(digits)
    } else {
        tracing::warn!(length = digits.len(), "Invalid phone number format");
        Some(trimmed.to_string())
    }
}

/// Display form `XXX-XXXX`.
#[must_use]
pub fn format_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 7 {
        format!("{}-{}", &digits[..3], &digits[3..])
    } else {
        phone.to_string()
    }
}
