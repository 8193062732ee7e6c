//! Shared fixtures for the bridge integration tests

#![allow(dead_code)]

use std::sync::Arc;

use jsembed_core::{Context, Isolate};
use jsembed_test::TestEngine;

pub struct Fixture {
    pub engine: Arc<TestEngine>,
    pub isolate: Isolate,
    pub ctx: Context,
}

/// A fresh engine with one isolate and one context
pub fn setup() -> Fixture {
    let engine = TestEngine::new();
    let isolate = Isolate::new(engine.clone()).unwrap();
    let ctx = Context::new(&isolate).unwrap();
    Fixture { engine, isolate, ctx }
}
