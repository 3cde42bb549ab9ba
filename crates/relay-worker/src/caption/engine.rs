//! Caption rendering against per-user counter state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::template::{CaptionTemplate, CounterSpec, Segment};

/// Current value of one counter placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterValue {
    pub value: u64,
    pub width: usize,
    pub parenthesized: bool,
}

impl CounterValue {
    fn from_spec(spec: &CounterSpec) -> Self {
        Self {
            value: spec.start,
            width: spec.width,
            parenthesized: spec.parenthesized,
        }
    }

    fn render(&self) -> String {
        let digits = format!("{:0width$}", self.value, width = self.width);
        if self.parenthesized {
            format!("({})", digits)
        } else {
            digits
        }
    }
}

/// Render history for one template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterState {
    pub uploads: u64,
    pub counters: BTreeMap<String, CounterValue>,
    pub cycle_len: Option<usize>,
}

impl CounterState {
    /// Episode number used by conditional placeholders.
    pub fn episode(&self) -> u64 {
        self.counters.values().map(|c| c.value).min().unwrap_or(0)
    }
}

/// A saved template plus its counters.
#[derive(Debug, Clone)]
pub struct CaptionEngine {
    template: CaptionTemplate,
    state: CounterState,
}

impl CaptionEngine {
    /// Start a template with fresh counters.
    pub fn new(template: &str) -> Self {
        Self {
            template: CaptionTemplate::parse(template),
            state: CounterState::default(),
        }
    }

    pub fn template(&self) -> &str {
        self.template.source()
    }

    pub fn state(&self) -> &CounterState {
        &self.state
    }

    /// Render the next caption, advancing counters at their trigger points.
    pub fn render(&mut self) -> String {
        self.state.uploads += 1;
        let n = self.state.uploads;

        if self.state.cycle_len.is_none() {
            self.state.cycle_len = self.template.cycle_len();
        }

        let advance = match self.state.cycle_len {
            Some(len) if len > 0 => n > 1 && (n - 1) % len as u64 == 0,
            _ => n > 1,
        };
        if advance {
            for counter in self.state.counters.values_mut() {
                counter.value += 1;
            }
        }

        for spec in self.template.counters() {
            self.state
                .counters
                .entry(spec.key.clone())
                .or_insert_with(|| CounterValue::from_spec(spec));
        }

        let episode = self.state.episode();
        let mut out = String::new();
        for segment in self.template.segments() {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Cycle(options) => {
                    let index = ((n - 1) % options.len() as u64) as usize;
                    out.push_str(&options[index]);
                }
                Segment::Counter(spec) => {
                    if let Some(counter) = self.state.counters.get(&spec.key) {
                        out.push_str(&counter.render());
                    }
                }
                Segment::Conditional { text, target } => {
                    if *target == Some(episode) {
                        out.push_str(text);
                    }
                }
            }
        }

        bold(&out)
    }
}

/// Caption used when the user has no saved template.
pub fn default_caption(file_name: &str) -> String {
    bold(file_name)
}

fn bold(text: &str) -> String {
    format!("**{}**", text)
}
