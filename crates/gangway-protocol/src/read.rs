//! Byte-level helpers shared by the envelope parsers.

use std::io::{self, Read};

use crate::errors::WireError;

/// Reads exactly one byte, mapping end-of-stream to [`WireError::ConnectionLost`].
pub(crate) fn next_byte<R: Read + ?Sized>(stream: &mut R) -> Result<u8, WireError> {
    let mut byte = [0_u8; 1];
    match stream.read_exact(&mut byte) {
        Ok(()) => Ok(byte[0]),
        Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => {
            Err(WireError::lost("end of stream inside envelope"))
        }
        Err(error) => Err(WireError::lost_io("transport error inside envelope", error)),
    }
}

/// Consumes one byte and fails with a framing error unless it matches.
pub(crate) fn expect_byte<R: Read + ?Sized>(stream: &mut R, expected: u8) -> Result<(), WireError> {
    let got = next_byte(stream)?;
    if got == expected {
        Ok(())
    } else {
        Err(WireError::framing(format!(
            "expected '{}', got '{}'",
            expected as char,
            printable(got)
        )))
    }
}

/// Accumulates bytes until `delimiter`, enforcing `limit` on the field size.
///
/// The delimiter is consumed but not included in the returned field.
pub(crate) fn read_until<R: Read + ?Sized>(
    stream: &mut R,
    delimiter: u8,
    limit: usize,
    field: &'static str,
) -> Result<Vec<u8>, WireError> {
    let mut collected = Vec::new();
    loop {
        let byte = next_byte(stream)?;
        if byte == delimiter {
            return Ok(collected);
        }
        if collected.len() == limit {
            return Err(WireError::framing(format!(
                "{field} exceeds {limit} bytes"
            )));
        }
        collected.push(byte);
    }
}

/// Decodes a field as UTF-8, failing with a framing error on invalid bytes.
pub(crate) fn utf8_field(bytes: Vec<u8>, field: &'static str) -> Result<String, WireError> {
    String::from_utf8(bytes)
        .map_err(|_| WireError::framing(format!("{field} is not valid UTF-8")))
}

/// Parses a decimal length field.
pub(crate) fn decimal_field(bytes: &[u8], field: &'static str) -> Result<u64, WireError> {
    if bytes.is_empty() {
        return Err(WireError::framing(format!("{field} is empty")));
    }
    let mut value: u64 = 0;
    for byte in bytes {
        if !byte.is_ascii_digit() {
            return Err(WireError::framing(format!(
                "{field} contains non-digit '{}'",
                printable(*byte)
            )));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(byte - b'0')))
            .ok_or_else(|| WireError::framing(format!("{field} overflows")))?;
    }
    Ok(value)
}

fn printable(byte: u8) -> char {
    if byte.is_ascii_graphic() || byte == b' ' {
        byte as char
    } else {
        '\u{fffd}'
    }
}
