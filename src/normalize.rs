use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;

/// Lines kept from the head of a raw log; the rest is dropped.
pub const MAX_LINES: usize = 50;

pub const DATE_PLACEHOLDER: &str = "[DATA]";
pub const TIME_PLACEHOLDER: &str = "[HORA]";

// These patterns define cache-key equality. ASCII digits only and no word
// boundaries: `x2024-12-14y` is still a date.

// ISO: 2024-12-14
static RE_DATE_ISO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9]{4}-[0-9]{2}-[0-9]{2}").unwrap()
});

// Day first: 14/12/2024
static RE_DATE_DMY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9]{2}/[0-9]{2}/[0-9]{4}").unwrap()
});

// Year first with slashes (Go log package): 2024/12/14
static RE_DATE_YMD_SLASH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9]{4}/[0-9]{2}/[0-9]{2}").unwrap()
});

// 10:20:30 or 10:20:30.123
static RE_CLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9]{2}:[0-9]{2}:[0-9]{2}(?:\.[0-9]{1,3})?").unwrap()
});

// \r\n first so a CRLF pair counts as one break
static RE_LINE_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\r\n|\r|\n").unwrap()
});

/// Canonical form of a raw log: the first [`MAX_LINES`] lines with dates and
/// clock times replaced by placeholders. Used both as the cache key and as the
/// text sent to the model.
pub fn normalize(raw: &str) -> String {
    if raw.chars().all(is_blank_char) {
        return String::new();
    }
    let head = truncate_lines(raw, MAX_LINES);
    redact_timestamps(&head)
}

/// Same as [`normalize`], treating an absent log as empty.
pub fn normalize_opt(raw: Option<&str>) -> String {
    raw.map(normalize).unwrap_or_default()
}

/// Whitespace for blank detection: ASCII controls plus Unicode separators,
/// but not the no-break spaces.
fn is_blank_char(c: char) -> bool {
    match c {
        '\t' | '\n' | '\u{0B}' | '\u{0C}' | '\r' | '\u{1C}'..='\u{1F}' => true,
        '\u{85}' | '\u{A0}' | '\u{2007}' | '\u{202F}' => false,
        _ => c.is_whitespace(),
    }
}

/// Lines end at `\r\n`, `\r` or `\n`; a terminator at the very end does not
/// open an empty last line.
fn truncate_lines(raw: &str, max_lines: usize) -> String {
    let body = raw
        .strip_suffix("\r\n")
        .or_else(|| raw.strip_suffix('\n'))
        .or_else(|| raw.strip_suffix('\r'))
        .unwrap_or(raw);
    RE_LINE_BREAK.split(body).take(max_lines).join("\n")
}

fn redact_timestamps(input: &str) -> String {
    // Order matters: all date shapes first, then clock times
    let s = RE_DATE_ISO.replace_all(input, DATE_PLACEHOLDER);
    let s = RE_DATE_DMY.replace_all(&s, DATE_PLACEHOLDER);
    let s = RE_DATE_YMD_SLASH.replace_all(&s, DATE_PLACEHOLDER);
    let s = RE_CLOCK.replace_all(&s, TIME_PLACEHOLDER);
    s.into_owned()
}
