use alloc::string::String;

pub(crate) const CR: u8 = 13;
pub(crate) const LF: u8 = 10;
pub(crate) const SP: u8 = 32;
pub(crate) const COLON: u8 = 58;
const ZERO: u8 = 48;

/// Parses an unsigned decimal. Anything other than digits, or a value that
/// overflows `usize`, is rejected.
pub(crate) fn atoi(data: &[u8]) -> Option<usize> {
    if data.is_empty() {
        return None;
    }

    let mut val: usize = 0;
    for digit in data {
        if !digit.is_ascii_digit() {
            return None;
        }
        val = val
            .checked_mul(10)?
            .checked_add((digit - ZERO) as usize)?;
    }

    Some(val)
}

/// Decimal rendering of an integer without going through `core::fmt`.
pub(crate) struct AsciiInt {
    digits: [u8; 20],
    start: usize,
}

impl AsciiInt {
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.digits[self.start..]
    }
}

impl From<u64> for AsciiInt {
    fn from(value: u64) -> Self {
        let mut digits = [ZERO; 20];
        let mut start = digits.len();
        let mut int = value;

        loop {
            start -= 1;
            digits[start] = ZERO + (int % 10) as u8;
            int /= 10;
            if int == 0 {
                break;
            }
        }

        AsciiInt { digits, start }
    }
}

/// ISO-8859-1 decoding: every byte maps to the code point of the same value,
/// so any header bytes survive the conversion.
pub(crate) fn latin1(data: &[u8]) -> String {
    data.iter().map(|b| *b as char).collect()
}

/// Offset of the next `\r\n` at or after `from`.
pub(crate) fn find_crlf(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(2)
        .position(|w| w == [CR, LF])
        .map(|p| p + from)
}
