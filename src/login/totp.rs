//! RFC 6238 time-based one-time passwords (HMAC-SHA1, 30 s step, 6 digits).

use hmac::{Hmac, Mac};
use sha1::Sha1;
use thiserror::Error;

pub const TOTP_STEP_SECS: u64 = 30;
pub const TOTP_DIGITS: u32 = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TotpError {
    #[error("TOTP secret is empty")]
    EmptySecret,
    #[error("TOTP secret is not valid base32 (offending character {0:?})")]
    InvalidBase32(char),
}

/// Decodes an RFC 4648 base32 secret. Spaces, dashes and `=` padding are
/// ignored and letters are case-insensitive, matching how authenticator apps
/// display secrets.
pub fn decode_base32(secret: &str) -> Result<Vec<u8>, TotpError> {
    let mut out = Vec::with_capacity(secret.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;

    for ch in secret.chars() {
        if ch.is_whitespace() || ch == '-' || ch == '=' {
            continue;
        }
        let upper = ch.to_ascii_uppercase();
        let value = match upper {
            'A'..='Z' => upper as u32 - 'A' as u32,
            '2'..='7' => upper as u32 - '2' as u32 + 26,
            _ => return Err(TotpError::InvalidBase32(ch)),
        };
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }

    if out.is_empty() {
        return Err(TotpError::EmptySecret);
    }
    Ok(out)
}

/// HOTP value (RFC 4226) for `counter`, truncated to `digits`.
pub fn hotp(key: &[u8], counter: u64, digits: u32) -> u32 {
    let mut mac = match Hmac::<Sha1>::new_from_slice(key) {
        Ok(m) => m,
        // HMAC accepts keys of any length.
        Err(_) => return 0,
    };
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = (u32::from(digest[offset]) & 0x7f) << 24
        | u32::from(digest[offset + 1]) << 16
        | u32::from(digest[offset + 2]) << 8
        | u32::from(digest[offset + 3]);
    binary % 10u32.pow(digits)
}

/// Six-digit code for `secret` at Unix time `unix_secs`, zero-padded.
pub fn code_at(secret: &str, unix_secs: u64) -> Result<String, TotpError> {
    let key = decode_base32(secret)?;
    let value = hotp(&key, unix_secs / TOTP_STEP_SECS, TOTP_DIGITS);
    Ok(format!("{:0width$}", value, width = TOTP_DIGITS as usize))
}

/// Code for the current 30-second window.
pub fn current_code(secret: &str) -> Result<String, TotpError> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    code_at(secret, now)
}

/// Seconds left before the current code rolls over.
pub fn seconds_remaining(unix_secs: u64) -> u64 {
    TOTP_STEP_SECS - (unix_secs % TOTP_STEP_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    // base32("12345678901234567890"), the RFC 6238 SHA-1 test key.
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn decodes_rfc_key() {
        assert_eq!(decode_base32(RFC_SECRET).unwrap(), b"12345678901234567890");
    }

    #[test]
    fn decode_tolerates_formatting() {
        let spaced = "gezd gnbv gy3t qojq gezd gnbv gy3t qojq";
        assert_eq!(decode_base32(spaced).unwrap(), b"12345678901234567890");
    }

    #[test]
    fn rejects_bad_characters() {
        assert_eq!(decode_base32("ABC1"), Err(TotpError::InvalidBase32('1')));
        assert_eq!(decode_base32("  "), Err(TotpError::EmptySecret));
    }

    #[test]
    fn rfc6238_vectors_truncated_to_six_digits() {
        // Appendix B lists 8-digit values 94287082, 07081804, 14050471, 89005924.
        assert_eq!(code_at(RFC_SECRET, 59).unwrap(), "287082");
        assert_eq!(code_at(RFC_SECRET, 1_111_111_109).unwrap(), "081804");
        assert_eq!(code_at(RFC_SECRET, 1_111_111_111).unwrap(), "050471");
        assert_eq!(code_at(RFC_SECRET, 1_234_567_890).unwrap(), "005924");
    }

    #[test]
    fn rfc4226_hotp_vectors() {
        let key = b"12345678901234567890";
        assert_eq!(hotp(key, 0, 6), 755224);
        assert_eq!(hotp(key, 1, 6), 287082);
        assert_eq!(hotp(key, 9, 6), 520489);
    }

    #[test]
    fn remaining_window() {
        assert_eq!(seconds_remaining(60), 30);
        assert_eq!(seconds_remaining(89), 1);
    }
}
