//! Property tests for Vent.
//!
//! Properties use randomized input generation to protect the hashing and
//! group-resolution invariants the sticky assignment depends on.
//!
//! Run with: `cargo test --test properties`

#[path = "properties/ventilation.rs"]
mod ventilation;
