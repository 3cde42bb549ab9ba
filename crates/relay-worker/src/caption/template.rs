//! Caption template tokenizer.
//!
//! A template is plain text with bracketed placeholders:
//!
//! - `[re (480p, 720p)]` cycles through its options, one per render
//! - `[01]` or `[(01)]` is a zero-padded counter starting at the literal
//! - `[End (02)]` renders `End` only when the episode number equals 2
//!
//! Brackets that match none of these stay literal text.

use std::sync::OnceLock;

use regex::Regex;

fn cyclic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^re\s*\((.*)\)$").expect("valid regex"))
}

fn counter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\(\d+\)|\d+)\s*$").expect("valid regex"))
}

fn conditional_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-zA-Z0-9\s]+?)\s*\((.*)\)$").expect("valid regex"))
}

/// Counter placeholder as written in the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSpec {
    /// Token text between the brackets, trimmed; identifies the counter.
    pub key: String,
    pub start: u64,
    /// Digit count of the literal.
    pub width: usize,
    pub parenthesized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Cycle(Vec<String>),
    Counter(CounterSpec),
    Conditional { text: String, target: Option<u64> },
}

/// A template split once into literal spans and typed placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl CaptionTemplate {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(open) = rest.find('[') {
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find(']') else {
                literal.push_str(&rest[open..]);
                rest = "";
                break;
            };

            match classify(&after[..close]) {
                Some(segment) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                    rest = &after[close + 1..];
                }
                None => {
                    literal.push('[');
                    rest = after;
                }
            }
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self {
            source: source.to_string(),
            segments,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Option count of the first cyclic placeholder, if any.
    pub fn cycle_len(&self) -> Option<usize> {
        self.segments.iter().find_map(|s| match s {
            Segment::Cycle(options) => Some(options.len()),
            _ => None,
        })
    }

    pub fn counters(&self) -> impl Iterator<Item = &CounterSpec> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Counter(spec) => Some(spec),
            _ => None,
        })
    }
}

fn classify(inner: &str) -> Option<Segment> {
    if let Some(caps) = cyclic_re().captures(inner) {
        let options: Vec<String> = caps[1].split(',').map(|o| o.trim().to_string()).collect();
        if options.iter().all(String::is_empty) {
            return None;
        }
        return Some(Segment::Cycle(options));
    }

    if let Some(caps) = counter_re().captures(inner) {
        let token = &caps[1];
        let parenthesized = token.starts_with('(');
        let digits = token.trim_start_matches('(').trim_end_matches(')');
        let start = digits.parse::<u64>().ok()?;
        return Some(Segment::Counter(CounterSpec {
            key: token.to_string(),
            start,
            width: digits.len(),
            parenthesized,
        }));
    }

    if let Some(caps) = conditional_re().captures(inner) {
        let digits: String = caps[2].chars().filter(char::is_ascii_digit).collect();
        return Some(Segment::Conditional {
            text: caps[1].trim().to_string(),
            target: digits.parse().ok(),
        });
    }

    None
}
