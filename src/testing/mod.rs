//! Test doubles shared by unit and integration tests.

pub mod mock_engine;

pub use mock_engine::{EngineCall, MockEngine};
