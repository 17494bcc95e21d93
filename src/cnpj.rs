//! CNPJ (Brazilian business registry number) validation.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Either 14 bare digits or the `XX.XXX.XXX/XXXX-XX` mask (separators optional).
    static ref CNPJ_SHAPE: Regex =
        Regex::new(r"^\d{2}\.?\d{3}\.?\d{3}/?\d{4}-?\d{2}$").unwrap();
}

const FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Validate a CNPJ using its two mod-11 check digits and return its 14 digits.
///
/// Accepts bare digits or the usual punctuation. Sequences of a single
/// repeated digit pass the arithmetic but are not issued, so they are rejected.
pub fn normalize_cnpj(cnpj: &str) -> Option<String> {
    let trimmed = cnpj.trim();
    if !CNPJ_SHAPE.is_match(trimmed) {
        return None;
    }

    let digits: Vec<u32> = trimmed.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 14 {
        return None;
    }

    if digits.iter().all(|d| *d == digits[0]) {
        return None;
    }

    let first = check_digit(&digits[..12], &FIRST_WEIGHTS);
    if first != digits[12] {
        return None;
    }

    let second = check_digit(&digits[..13], &SECOND_WEIGHTS);
    if second != digits[13] {
        return None;
    }

    Some(digits.iter().map(|d| char::from_digit(*d, 10).unwrap_or('0')).collect())
}

fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    match sum % 11 {
        r if r < 2 => 0,
        r => 11 - r,
    }
}
