//! Conversion between Bilibili's legacy `av` numbers and canonical `BV` ids.

use std::sync::LazyLock;

use regex::Regex;

const ALPHABET: &[u8; 58] = b"fZodR9XQDSUm21yCkr6zBqiveYah8bt4xsWpHnJE7jL5VG3guMTKNPAwcF";
const TEMPLATE: &[u8; 12] = b"BV1  4 1 7  ";
const DIGIT_OFFSETS: [usize; 6] = [11, 10, 3, 8, 4, 6];
const XOR_MASK: u64 = 177_451_812;
const ADD_OFFSET: u64 = 8_728_348_608;

static CANONICAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^BV1[1-9A-HJ-NP-Za-km-z]{9}$").expect("canonical bvid regex")
});
static EMBEDDED_BV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)BV[0-9a-z]+").expect("embedded bvid regex"));
static EMBEDDED_AV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)av([0-9]+)").expect("embedded av regex"));

pub fn is_canonical(id: &str) -> bool {
    CANONICAL_RE.is_match(id)
}

/// Returns the `BV` form of `id`.
///
/// Canonical ids come back unchanged. A `BV...` token embedded in a longer
/// string is extracted, and an `av<digits>` token is converted. Anything else
/// is returned as-is; the lookup for it will simply fail later.
pub fn canonicalize(id: &str) -> String {
    if is_canonical(id) {
        return id.to_string();
    }
    if let Some(found) = EMBEDDED_BV_RE.find(id) {
        return found.as_str().to_string();
    }
    if let Some(captures) = EMBEDDED_AV_RE.captures(id)
        && let Ok(number) = captures[1].parse::<u64>()
    {
        return av_to_bv(number);
    }
    id.to_string()
}

pub fn av_to_bv(av: u64) -> String {
    let mut value = (av ^ XOR_MASK).wrapping_add(ADD_OFFSET);
    let mut output = *TEMPLATE;
    for offset in DIGIT_OFFSETS {
        output[offset] = ALPHABET[(value % 58) as usize];
        value /= 58;
    }
    String::from_utf8_lossy(&output).into_owned()
}
