//! Order number checksum validation.

/// Check an order number against the Luhn checksum.
///
/// The number must be a non-empty sequence of ASCII digits; anything else is
/// rejected as malformed. Digits are folded one at a time, so the number may
/// be arbitrarily long.
pub fn is_valid(number: &str) -> bool {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let sum: u32 = number
        .bytes()
        .rev()
        .map(|b| u32::from(b - b'0'))
        .enumerate()
        .map(|(idx, digit)| {
            if idx % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                digit
            }
        })
        .fold(0, |acc, digit| (acc + digit) % 10);

    sum == 0
}
