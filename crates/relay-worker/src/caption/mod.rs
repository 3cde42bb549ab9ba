//! Caption templates and their per-user counters.

pub mod engine;
pub mod template;

pub use engine::{default_caption, CaptionEngine, CounterState, CounterValue};
pub use template::{CaptionTemplate, CounterSpec, Segment};
