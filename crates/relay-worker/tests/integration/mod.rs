//! Integration tests for the relay worker.

pub mod fakes;

mod audio_order_tests;
mod pipeline_tests;
mod queue_tests;
mod relay_tests;
