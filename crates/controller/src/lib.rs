//! Client for the proxy engine's external controller (RESTful) API.

mod client;

pub use client::{Client, DELAY_TEST_URL, DELAY_TIMEOUT_MS, EngineState, Error};
