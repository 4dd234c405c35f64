pub mod encoding;
pub mod epub;
pub mod fb2;

use chrono::NaiveDate;

use crate::library::book::{ticks_from_date, ticks_from_datetime};

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Capitalize every word: first letter uppercase, the rest lowercase.
pub fn capitalize(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a date as found in FB2/EPUB metadata into ticks.
/// Accepts full ISO dates and timestamps; a bare 4-digit year falls back
/// to January 1st of that year. Unparseable input yields 0.
pub fn parse_date(s: &str) -> i64 {
    let s = s.trim();
    if s.is_empty() {
        return 0;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return ticks_from_datetime(dt.to_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return ticks_from_date(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%d.%m.%Y") {
        return ticks_from_date(date);
    }
    if s.len() >= 4
        && let Ok(year) = s[..4].parse::<i32>()
        && let Some(date) = NaiveDate::from_ymd_opt(year, 1, 1)
    {
        return ticks_from_date(date);
    }
    0
}

/// True for characters inside the XML 1.0 legal range.
fn is_legal_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

/// Drop characters outside the XML 1.0 legal range.
pub fn strip_illegal_xml_chars(s: &str) -> String {
    s.chars().filter(|c| is_legal_xml_char(*c)).collect()
}

/// Rewrite stray `&nbsp;` entities (undeclared in XML) to their numeric form.
pub fn rewrite_nbsp(s: &str) -> String {
    s.replace("&nbsp;", "&#160;")
}

/// Resolve a general entity reference: the five predefined names plus
/// decimal/hex character references. Unknown entities yield `None`.
pub(crate) fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        _ => {}
    }

    if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
        if let Ok(code) = u32::from_str_radix(hex, 16)
            && let Some(c) = char::from_u32(code)
        {
            return Some(c.to_string());
        }
    } else if let Some(dec) = entity.strip_prefix('#')
        && let Ok(code) = dec.parse::<u32>()
        && let Some(c) = char::from_u32(code)
    {
        return Some(c.to_string());
    }

    None
}
