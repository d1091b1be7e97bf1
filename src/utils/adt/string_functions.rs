//! String and digest built-ins: trims, padding with three length
//! metrics, substrings, radix codecs and the crypto digests.

use base64::Engine as _;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::error::{function_invalid_argument, EngineResult};
use crate::storage::codec::encode_text_to_bytes;
use crate::storage::file_info::Encoding;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimMode {
    Both,
    Left,
    Right,
}

/// Trims the cutset, or whitespace when the cutset is empty.
pub fn trim_text(s: &str, cutset: &str, mode: TrimMode) -> String {
    if cutset.is_empty() {
        return match mode {
            TrimMode::Both => s.trim().to_string(),
            TrimMode::Left => s.trim_start().to_string(),
            TrimMode::Right => s.trim_end().to_string(),
        };
    }
    let set: Vec<char> = cutset.chars().collect();
    let matcher = |c: char| set.contains(&c);
    match mode {
        TrimMode::Both => s.trim_matches(matcher).to_string(),
        TrimMode::Left => s.trim_start_matches(matcher).to_string(),
        TrimMode::Right => s.trim_end_matches(matcher).to_string(),
    }
}

pub fn base64_encode(s: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(s.as_bytes())
}

pub fn base64_decode(s: &str) -> String {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

pub fn hex_encode(s: &str) -> String {
    s.bytes().map(|b| format!("{b:02x}")).collect()
}

pub fn hex_decode(s: &str) -> String {
    if s.len() % 2 != 0 {
        return String::new();
    }
    let mut bytes = Vec::with_capacity(s.len() / 2);
    for i in (0..s.len()).step_by(2) {
        match u8::from_str_radix(&s[i..i + 2], 16) {
            Ok(b) => bytes.push(b),
            Err(_) => return String::new(),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

pub fn rune_len(s: &str) -> usize {
    s.chars().count()
}

pub fn byte_len(s: &str, encoding: Encoding) -> usize {
    encode_text_to_bytes(s, encoding).len()
}

pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingMetric {
    RuneCount,
    ByteCount,
    Width,
}

impl PaddingMetric {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LEN" => Some(Self::RuneCount),
            "BYTE" => Some(Self::ByteCount),
            "WIDTH" => Some(Self::Width),
            _ => None,
        }
    }
}

fn metric_len(s: &str, metric: PaddingMetric, encoding: Encoding) -> usize {
    match metric {
        PaddingMetric::RuneCount => rune_len(s),
        PaddingMetric::ByteCount => byte_len(s, encoding),
        PaddingMetric::Width => display_width(s),
    }
}

fn rune_metric(c: char, metric: PaddingMetric, encoding: Encoding) -> usize {
    match metric {
        PaddingMetric::RuneCount => 1,
        PaddingMetric::ByteCount => byte_len(&c.to_string(), encoding),
        PaddingMetric::Width => UnicodeWidthChar::width(c).unwrap_or(0),
    }
}

/// Pads `s` up to `length` in the chosen metric. The pad string repeats
/// and truncates; refusing to split a rune across the byte target is an
/// error.
pub fn pad_string(
    fn_name: &str,
    s: &str,
    length: usize,
    pad: &str,
    left: bool,
    metric: PaddingMetric,
    encoding: Encoding,
) -> EngineResult<Value> {
    let current = metric_len(s, metric, encoding);
    if length <= current || pad.is_empty() {
        return Ok(Value::String(s.to_string()));
    }
    let mut needed = length - current;
    let mut padding = String::new();
    for c in pad.chars().cycle() {
        let w = rune_metric(c, metric, encoding);
        if w > needed {
            if metric == PaddingMetric::RuneCount {
                break;
            }
            return Err(function_invalid_argument(
                fn_name,
                "cannot split pad string in a byte array of a character",
            ));
        }
        padding.push(c);
        needed -= w;
        if needed == 0 {
            break;
        }
    }
    Ok(Value::String(if left {
        format!("{padding}{s}")
    } else {
        format!("{s}{padding}")
    }))
}

/// Rune-indexed substring; a negative start counts back from the end.
/// Out-of-range positions and negative lengths yield Null.
pub fn substr(s: &str, start: i64, length: Option<i64>) -> Value {
    let runes: Vec<char> = s.chars().collect();
    let strlen = runes.len() as i64;
    let mut start = start;
    if start < 0 {
        start += strlen;
    }
    if start < 0 || start >= strlen {
        return Value::Null;
    }
    let end = match length {
        Some(len) => {
            if len < 0 {
                return Value::Null;
            }
            (start + len).min(strlen)
        }
        None => strlen,
    };
    Value::String(runes[start as usize..end as usize].iter().collect())
}

/// Byte offset of the first occurrence, 0-based. Byte-indexed on purpose
/// while `substr` counts runes.
pub fn instr(s: &str, sub: &str) -> Value {
    match s.find(sub) {
        Some(index) => Value::Integer(index as i64),
        None => Value::Null,
    }
}

pub fn list_elem(s: &str, sep: &str, index: i64) -> Value {
    if index < 0 {
        return Value::Null;
    }
    let parts: Vec<&str> = if sep.is_empty() {
        vec![s]
    } else {
        s.split(sep).collect()
    };
    match parts.get(index as usize) {
        Some(part) => Value::String((*part).to_string()),
        None => Value::Null,
    }
}

// ---- digests; all render lowercase hex ----

pub fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    to_hex(&hasher.finalize())
}

pub fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    to_hex(&hasher.finalize())
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    to_hex(&hasher.finalize())
}

pub fn sha512_hex(input: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(input.as_bytes());
    to_hex(&hasher.finalize())
}

pub fn md5_hmac_hex(input: &str, key: &str) -> String {
    let mut mac =
        Hmac::<Md5>::new_from_slice(key.as_bytes()).expect("hmac accepts keys of any length");
    mac.update(input.as_bytes());
    to_hex(&mac.finalize().into_bytes())
}

pub fn sha1_hmac_hex(input: &str, key: &str) -> String {
    let mut mac =
        Hmac::<Sha1>::new_from_slice(key.as_bytes()).expect("hmac accepts keys of any length");
    mac.update(input.as_bytes());
    to_hex(&mac.finalize().into_bytes())
}

pub fn sha256_hmac_hex(input: &str, key: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key.as_bytes()).expect("hmac accepts keys of any length");
    mac.update(input.as_bytes());
    to_hex(&mac.finalize().into_bytes())
}

pub fn sha512_hmac_hex(input: &str, key: &str) -> String {
    let mut mac =
        Hmac::<Sha512>::new_from_slice(key.as_bytes()).expect("hmac accepts keys of any length");
    mac.update(input.as_bytes());
    to_hex(&mac.finalize().into_bytes())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substr_negative_start_wraps() {
        assert_eq!(substr("abcde", -2, None), Value::String("de".into()));
        assert_eq!(substr("abcde", 1, Some(2)), Value::String("bc".into()));
        assert_eq!(substr("abcde", 9, None), Value::Null);
        assert_eq!(substr("abcde", 0, Some(-1)), Value::Null);
    }

    #[test]
    fn substr_counts_runes_instr_counts_bytes() {
        assert_eq!(substr("héllo", 1, Some(1)), Value::String("é".into()));
        // The match starts after the two-byte é.
        assert_eq!(instr("héllo", "llo"), Value::Integer(3));
        assert_eq!(instr("abc", "z"), Value::Null);
    }

    #[test]
    fn padding_by_rune_count() {
        assert_eq!(
            pad_string("LPAD", "7", 3, "0", true, PaddingMetric::RuneCount, Encoding::Utf8)
                .unwrap(),
            Value::String("007".into())
        );
        assert_eq!(
            pad_string("RPAD", "ab", 5, "xy", false, PaddingMetric::RuneCount, Encoding::Utf8)
                .unwrap(),
            Value::String("abxyx".into())
        );
        // Already long enough: unchanged.
        assert_eq!(
            pad_string("LPAD", "abcd", 3, "0", true, PaddingMetric::RuneCount, Encoding::Utf8)
                .unwrap(),
            Value::String("abcd".into())
        );
    }

    #[test]
    fn byte_padding_cannot_split_a_rune() {
        let err = pad_string(
            "LPAD",
            "a",
            4,
            "あ",
            true,
            PaddingMetric::ByteCount,
            Encoding::Utf8,
        )
        .unwrap_err();
        assert!(err.message.contains("cannot split"));
    }

    #[test]
    fn width_padding_counts_east_asian_double() {
        let padded = pad_string(
            "RPAD",
            "あ",
            4,
            "-",
            false,
            PaddingMetric::Width,
            Encoding::Utf8,
        )
        .unwrap();
        assert_eq!(padded, Value::String("あ--".into()));
    }

    #[test]
    fn trim_modes() {
        assert_eq!(trim_text("  a  ", "", TrimMode::Both), "a");
        assert_eq!(trim_text("xxaxx", "x", TrimMode::Left), "axx");
        assert_eq!(trim_text("xxaxx", "x", TrimMode::Right), "xxa");
    }

    #[test]
    fn base64_and_hex_round_trips() {
        assert_eq!(base64_encode("foo"), "Zm9v");
        assert_eq!(base64_decode("Zm9v"), "foo");
        assert_eq!(hex_encode("AB"), "4142");
        assert_eq!(hex_decode("4142"), "AB");
        assert_eq!(hex_decode("zz"), "");
    }

    #[test]
    fn known_digests() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(sha1_hex("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn list_elem_indexing() {
        assert_eq!(
            list_elem("a,b,c", ",", 1),
            Value::String("b".into())
        );
        assert_eq!(list_elem("a,b,c", ",", 5), Value::Null);
        assert_eq!(list_elem("a,b,c", ",", -1), Value::Null);
    }
}
