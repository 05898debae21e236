//! Activation and recovery code generation
//!
//! Codes are 20 characters from a restricted base-32 alphabet, presented as
//! four dash-separated groups of five (`XXXXX-XXXXX-XXXXX-XXXXX`). The
//! first 16 characters are random; the last 4 carry a CRC-32 check value
//! over the first 16, so a mistyped code is rejected before any lookup.
//!
//! Recovery PUKs are 10-digit decimal one-time values.

use rand::rngs::OsRng;
use rand::RngCore;

/// Restricted base-32 alphabet (RFC 4648 without padding)
const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Random characters per code
const RANDOM_CHARS: usize = 16;

/// Check characters per code (20 bits of CRC-32)
const CHECK_CHARS: usize = 4;

/// Digits in a recovery PUK
pub const PUK_DIGITS: usize = 10;

fn char_value(c: u8) -> Option<u8> {
    ALPHABET.iter().position(|&a| a == c).map(|i| i as u8)
}

/// 20-bit check value over the 16 random characters' 5-bit values,
/// packed into 10 bytes before hashing
fn checksum(random_part: &[u8]) -> u32 {
    debug_assert_eq!(random_part.len(), RANDOM_CHARS);
    // pack 16 x 5 bits = 80 bits = 10 bytes
    let mut packed = [0u8; 10];
    let mut acc: u32 = 0;
    let mut bits = 0;
    let mut idx = 0;
    for &c in random_part {
        let v = char_value(c).expect("caller supplies alphabet characters") as u32;
        acc = (acc << 5) | v;
        bits += 5;
        while bits >= 8 {
            bits -= 8;
            packed[idx] = ((acc >> bits) & 0xFF) as u8;
            idx += 1;
        }
    }
    crc32fast::hash(&packed) & 0xFFFFF
}

/// Generate a fresh code: 16 CSPRNG characters plus 4 check characters,
/// dash-grouped
pub fn generate_code() -> String {
    let mut raw = [0u8; RANDOM_CHARS];
    OsRng.fill_bytes(&mut raw);

    let mut chars = Vec::with_capacity(RANDOM_CHARS + CHECK_CHARS);
    for b in raw {
        chars.push(ALPHABET[(b % 32) as usize]);
    }

    let mut check = checksum(&chars);
    let mut check_chars = [0u8; CHECK_CHARS];
    for slot in check_chars.iter_mut().rev() {
        *slot = ALPHABET[(check & 0x1F) as usize];
        check >>= 5;
    }
    chars.extend_from_slice(&check_chars);

    format_groups(&chars)
}

fn format_groups(chars: &[u8]) -> String {
    let mut out = String::with_capacity(23);
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && i % 5 == 0 {
            out.push('-');
        }
        out.push(c as char);
    }
    out
}

/// Validate shape and check characters of a code
pub fn validate_code(code: &str) -> bool {
    let bytes = code.as_bytes();
    if bytes.len() != 23 {
        return false;
    }

    let mut chars = Vec::with_capacity(RANDOM_CHARS + CHECK_CHARS);
    for (i, &b) in bytes.iter().enumerate() {
        if i % 6 == 5 {
            if b != b'-' {
                return false;
            }
        } else {
            if char_value(b).is_none() {
                return false;
            }
            chars.push(b);
        }
    }
    if chars.len() != RANDOM_CHARS + CHECK_CHARS {
        return false;
    }

    let mut expected = checksum(&chars[..RANDOM_CHARS]);
    for &c in chars[RANDOM_CHARS..].iter().rev() {
        if char_value(c).unwrap() as u32 != expected & 0x1F {
            return false;
        }
        expected >>= 5;
    }
    true
}

/// Generate a 10-digit decimal PUK
pub fn generate_puk() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    let n = u64::from_be_bytes(bytes) % 10u64.pow(PUK_DIGITS as u32);
    format!("{:010}", n)
}

/// Validate PUK shape
pub fn validate_puk(puk: &str) -> bool {
    puk.len() == PUK_DIGITS && puk.bytes().all(|b| b.is_ascii_digit())
}
