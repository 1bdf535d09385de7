//! String literal escaping as used by smali and by Android string resources.

/// Resolves backslash escapes (`\n`, `\t`, `\"`, `\'`, `\\`, `\uXXXX`, ...).
///
/// Unknown escapes keep the escaped character and drop the backslash, which is how
/// resource strings treat `\@` and `\?`.
pub fn unescape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let Ok(unit) = u32::from_str_radix(&hex, 16) else {
                    out.push_str("\\u");
                    out.push_str(&hex);
                    continue;
                };
                if let Some(decoded) = char::from_u32(unit) {
                    out.push(decoded);
                    continue;
                }
                // Characters outside the BMP are written as a pair of `\u` surrogates.
                if (0xD800..0xDC00).contains(&unit) {
                    let mut ahead = chars.clone();
                    if ahead.next() == Some('\\') && ahead.next() == Some('u') {
                        let low_hex: String = ahead.by_ref().take(4).collect();
                        let low = u32::from_str_radix(&low_hex, 16).ok();
                        if let Some(low @ 0xDC00..=0xDFFF) = low {
                            let combined = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
                            if let Some(decoded) = char::from_u32(combined) {
                                out.push(decoded);
                                chars = ahead;
                                continue;
                            }
                        }
                    }
                }
                out.push_str("\\u");
                out.push_str(&hex);
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
