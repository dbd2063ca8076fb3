//! Code 128 symbol encoder (character set B).
//!
//! Produces the bar/space module sequence for an ASCII payload; rasterization
//! lives in [`crate::artifacts`]. Hand-written like the HTML parser – the
//! symbology is small, fully specified, and stable.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Code128Error {
    /// Set B covers the printable ASCII range only.
    #[error("character {0:?} cannot be encoded in Code 128 set B")]
    UnsupportedChar(char),
    #[error("empty payload")]
    Empty,
}

const START_B: usize = 104;

/// Element widths for code values 0–105, six elements each (bar, space, ...),
/// summing to 11 modules.
const PATTERNS: [&[u8; 6]; 106] = [
    b"212222", b"222122", b"222221", b"121223", b"121322", b"131222", b"122213", b"122312",
    b"132212", b"221213", b"221312", b"231212", b"112232", b"122132", b"122231", b"113222",
    b"123122", b"123221", b"223211", b"221132", b"221231", b"213212", b"223112", b"312131",
    b"311222", b"321122", b"321221", b"312212", b"322112", b"322211", b"212123", b"212321",
    b"232121", b"111323", b"131123", b"131321", b"112313", b"132113", b"132311", b"211313",
    b"231113", b"231311", b"112133", b"112331", b"132131", b"113123", b"113321", b"133121",
    b"313121", b"211331", b"231131", b"213113", b"213311", b"213131", b"311123", b"311321",
    b"331121", b"312113", b"312311", b"332111", b"314111", b"221411", b"431111", b"111224",
    b"111422", b"121124", b"121421", b"141122", b"141221", b"112214", b"112412", b"122114",
    b"122411", b"142112", b"142211", b"241211", b"221114", b"413111", b"241112", b"134111",
    b"111242", b"121142", b"121241", b"114212", b"124112", b"124211", b"411212", b"421112",
    b"421211", b"212141", b"214121", b"412121", b"111143", b"111341", b"131141", b"114113",
    b"114311", b"411113", b"411311", b"113141", b"114131", b"311141", b"411131", b"211412",
    b"211214", b"211232",
];

/// Stop pattern: seven elements, 13 modules.
const STOP: &[u8; 7] = b"2331112";

/// Encode a payload as a module sequence (`true` = bar). No quiet zone is
/// included; callers add margins if the symbology context demands them.
pub fn encode(data: &str) -> Result<Vec<bool>, Code128Error> {
    if data.is_empty() {
        return Err(Code128Error::Empty);
    }
    let mut values = Vec::with_capacity(data.len());
    for ch in data.chars() {
        let code = ch as u32;
        if !(0x20..=0x7E).contains(&code) {
            return Err(Code128Error::UnsupportedChar(ch));
        }
        values.push((code - 0x20) as usize);
    }

    let mut checksum = START_B;
    for (i, value) in values.iter().enumerate() {
        checksum += value * (i + 1);
    }
    checksum %= 103;

    let mut modules = Vec::new();
    push_pattern(&mut modules, PATTERNS[START_B]);
    for value in &values {
        push_pattern(&mut modules, PATTERNS[*value]);
    }
    push_pattern(&mut modules, PATTERNS[checksum]);
    push_pattern(&mut modules, STOP);
    Ok(modules)
}

fn push_pattern(modules: &mut Vec<bool>, widths: &[u8]) {
    let mut is_bar = true;
    for w in widths {
        let count = (w - b'0') as usize;
        modules.extend(std::iter::repeat(is_bar).take(count));
        is_bar = !is_bar;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_count_is_fixed_per_char() {
        // start + n data + checksum at 11 modules each, stop at 13.
        let m = encode("AB").unwrap();
        assert_eq!(m.len(), 11 * (1 + 2 + 1) + 13);
    }

    #[test]
    fn starts_and_ends_with_bar() {
        let m = encode("HELLO-42").unwrap();
        assert!(m[0]);
        assert!(m[m.len() - 1]);
    }

    #[test]
    fn rejects_non_ascii() {
        assert_eq!(
            encode("中文"),
            Err(Code128Error::UnsupportedChar('中'))
        );
        assert_eq!(
            encode("a\tb"),
            Err(Code128Error::UnsupportedChar('\t'))
        );
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(encode(""), Err(Code128Error::Empty));
    }

    #[test]
    fn checksum_wraps_modulo_103() {
        // Long payloads exercise the modulo; encoding must stay well-formed.
        let payload = "0123456789".repeat(8);
        let m = encode(&payload).unwrap();
        assert_eq!(m.len(), 11 * (1 + payload.len() + 1) + 13);
    }
}
