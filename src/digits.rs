//! Conversion between ASCII digits and Bengali digits.
//!
//! Every field value we store uses Bengali digits, whatever the OCR engine
//! happened to produce. Key parsing goes the other way.

/// The Bengali digits `০` through `৯`, in order.
const BENGALI_DIGITS: [char; 10] = ['০', '১', '২', '৩', '৪', '৫', '৬', '৭', '৮', '৯'];

/// Replace every ASCII digit with the matching Bengali digit. All other
/// characters are left alone, so this is idempotent and preserves the number
/// of characters.
pub fn to_bengali_digits(s: &str) -> String {
    s.chars()
        .map(|c| match c.to_digit(10) {
            Some(d) if c.is_ascii_digit() => BENGALI_DIGITS[d as usize],
            _ => c,
        })
        .collect()
}

/// Replace every Bengali digit with the matching ASCII digit.
pub fn to_ascii_digits(s: &str) -> String {
    s.chars()
        .map(|c| match bengali_digit_value(c) {
            Some(d) => char::from(b'0' + d),
            None => c,
        })
        .collect()
}

/// Is this an ASCII or Bengali digit?
pub fn is_any_digit(c: char) -> bool {
    c.is_ascii_digit() || bengali_digit_value(c).is_some()
}

fn bengali_digit_value(c: char) -> Option<u8> {
    BENGALI_DIGITS
        .iter()
        .position(|&d| d == c)
        .map(|idx| idx as u8)
}
