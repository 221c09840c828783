use crate::error::{HarborError, Result};

/// First letter of a DEA registration number: the registrant type.
const DEA_REGISTRANT_TYPES: &[char] = &[
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K', 'L', 'M', 'P', 'R', 'S', 'T', 'U', 'X',
];

/// Hyphenated 10-digit NDC groupings.
const NDC_SHAPES: &[[usize; 3]] = &[[4, 4, 2], [5, 3, 2], [5, 4, 1]];

/// Validate a DEA registration number and return it uppercased.
///
/// Two letters then seven digits. The seventh digit is the last digit of
/// `(d1 + d3 + d5) + 2 * (d2 + d4 + d6)`.
pub fn check_dea_number(field: &str, value: &str) -> Result<String> {
    let normalized = value.trim().to_ascii_uppercase();
    let chars: Vec<char> = normalized.chars().collect();

    if chars.len() != 9 {
        return Err(HarborError::validation(field, "DEA number must be 9 characters"));
    }
    if !DEA_REGISTRANT_TYPES.contains(&chars[0]) {
        return Err(HarborError::validation(
            field,
            format!("unknown DEA registrant type '{}'", chars[0]),
        ));
    }
    if !chars[1].is_ascii_alphabetic() {
        return Err(HarborError::validation(field, "second character must be a letter"));
    }

    let digits: Vec<u32> = chars[2..].iter().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 7 {
        return Err(HarborError::validation(field, "DEA number must end in 7 digits"));
    }

    let sum = digits[0] + digits[2] + digits[4] + 2 * (digits[1] + digits[3] + digits[5]);
    if sum % 10 != digits[6] {
        return Err(HarborError::validation(field, "DEA check digit does not match"));
    }

    Ok(normalized)
}

/// Validate a hyphenated National Drug Code.
pub fn check_ndc(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    let groups: Vec<&str> = trimmed.split('-').collect();
    let shaped = groups.len() == 3
        && groups.iter().all(|g| g.chars().all(|c| c.is_ascii_digit()))
        && NDC_SHAPES.iter().any(|shape| {
            shape
                .iter()
                .zip(&groups)
                .all(|(len, group)| group.len() == *len)
        });

    if !shaped {
        return Err(HarborError::validation(
            field,
            format!("'{}' is not a hyphenated NDC (4-4-2, 5-3-2, 5-4-1 or 5-4-2)", value),
        ));
    }
    Ok(trimmed.to_string())
}

/// Validate a two-letter US state code and return it uppercased.
pub fn check_state_code(field: &str, value: &str) -> Result<String> {
    let normalized = value.trim().to_ascii_uppercase();
    if normalized.len() != 2 || !normalized.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(HarborError::validation(field, "must be a two-letter state code"));
    }
    Ok(normalized)
}

/// Minimal email shape check.
pub fn check_email(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {
            Ok(trimmed.to_string())
        }
        _ => Err(HarborError::validation(field, "is not an email address")),
    }
}
