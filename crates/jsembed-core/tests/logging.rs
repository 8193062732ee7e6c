//! Integration tests for the bridge's tracing output

mod common;

use std::io;
use std::sync::Arc;

use anyhow::anyhow;
use common::{setup, Fixture};
use jsembed_core::ObjectHooks;
use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }
}

struct SharedWriterGuard<'a> {
    buffer: &'a Arc<Mutex<Vec<u8>>>,
}

impl io::Write for SharedWriterGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard { buffer: &self.buffer }
    }
}

fn capture(max_level: tracing::Level, body: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_ansi(false)
        .with_writer(writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, body);
    writer.contents()
}

#[test]
fn test_disposer_failure_is_logged() {
    let Fixture { ctx, .. } = setup();
    let (proto, _) = ctx.create_object_prototype("Socket").unwrap();
    proto
        .instantiate((), ObjectHooks::new().disposer(|_, _| Err(anyhow!("socket already closed"))))
        .unwrap();

    let output = capture(tracing::Level::WARN, || ctx.destroy().unwrap());
    assert!(output.contains("disposer failed"), "{}", output);
    assert!(output.contains("socket already closed"), "{}", output);
    assert!(output.contains("Socket"), "{}", output);
}

#[test]
fn test_contained_panic_is_logged() {
    let Fixture { ctx, .. } = setup();
    ctx.add_raw_func("explode", |_, _, _| panic!("kaboom")).unwrap();

    let output = capture(tracing::Level::WARN, || {
        assert!(ctx.eval("explode()", "panic.js").is_err());
    });
    assert!(output.contains("host callback panicked"), "{}", output);
    assert!(output.contains("kaboom"), "{}", output);
}

#[test]
fn test_lifecycle_is_logged_at_debug() {
    let output = capture(tracing::Level::DEBUG, || {
        let Fixture { ctx, .. } = setup();
        ctx.destroy().unwrap();
    });
    assert!(output.contains("isolate created"), "{}", output);
    assert!(output.contains("context created"), "{}", output);
    assert!(output.contains("context destroyed"), "{}", output);
}

#[test]
fn test_quiet_at_warn_level_for_normal_use() {
    let output = capture(tracing::Level::WARN, || {
        let Fixture { ctx, .. } = setup();
        ctx.add_func("id", |args| args.first().cloned()).unwrap();
        ctx.run("id", &[serde_json::json!(1)]).unwrap();
        ctx.destroy().unwrap();
    });
    assert!(output.is_empty(), "{}", output);
}
