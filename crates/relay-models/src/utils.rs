//! Naming and parsing helpers shared by the relay crates.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use crate::media::VIDEO_EXTENSIONS;

/// Characters that are unsafe in file names on common platforms.
static UNSAFE_CHARS: OnceLock<Regex> = OnceLock::new();

fn unsafe_chars() -> &'static Regex {
    UNSAFE_CHARS.get_or_init(|| Regex::new(r#"[\\/*?"<>|:]"#).expect("valid regex"))
}

/// Replace path-hostile characters with `_`.
pub fn sanitize_filename(name: &str) -> String {
    unsafe_chars().replace_all(name.trim(), "_").into_owned()
}

/// Lower-cased extension including the leading dot, or an empty string.
pub fn extension_of(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match base.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < base.len() => base[idx..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// File stem without the extension.
pub fn stem_of(name: &str) -> &str {
    let ext_len = extension_of(name).len();
    &name[..name.len() - ext_len]
}

/// Upload name made of the brand and the original extension (`.mp4` when missing).
pub fn branded_filename(original: &str, brand: &str) -> String {
    let ext = extension_of(original);
    if ext.is_empty() {
        format!("{}.mp4", brand)
    } else {
        format!("{}{}", brand, ext)
    }
}

/// Derive a local file name from the last path segment of a URL.
///
/// Names without a video extension get `.mp4` appended.
pub fn filename_from_url(raw: &str, fallback: &str) -> String {
    let segment = url::Url::parse(raw)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(&s)
                .map(|d| d.into_owned())
                .unwrap_or(s)
        });

    let mut name = sanitize_filename(segment.as_deref().unwrap_or(fallback));
    if name.is_empty() {
        name = sanitize_filename(fallback);
    }
    let ext = extension_of(&name);
    if !VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        name.push_str(".mp4");
    }
    name
}

/// Errors from [`parse_time`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeParseError {
    #[error("invalid time component: {0}")]
    InvalidComponent(String),
    #[error("time must be greater than zero")]
    Zero,
}

/// Parse a duration such as `5s`, `1m`, `1m 30s` or `1h` into seconds.
///
/// Components without a recognised unit suffix are ignored.
pub fn parse_time(input: &str) -> Result<u64, TimeParseError> {
    let mut total: u64 = 0;
    for part in input.to_ascii_lowercase().split_whitespace() {
        let (digits, multiplier) = match part.chars().last() {
            Some('s') => (&part[..part.len() - 1], 1),
            Some('m') => (&part[..part.len() - 1], 60),
            Some('h') => (&part[..part.len() - 1], 3600),
            _ => continue,
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| TimeParseError::InvalidComponent(part.to_string()))?;
        total = total.saturating_add(value.saturating_mul(multiplier));
    }
    if total == 0 {
        return Err(TimeParseError::Zero);
    }
    Ok(total)
}

/// Human-readable byte count, `N/A` for zero.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "N/A".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rendered = format!("{:.2}", value);
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", rendered, UNITS[unit])
}
