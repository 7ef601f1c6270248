//! The UI-affinity thread: the only place script is ever evaluated.
use crate::{KVStoreError, Result};
use serde_json::Value;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

/// The embedding page's "evaluate script" primitive.
pub trait ScriptHost: Send + 'static {
    fn evaluate_script(&mut self, script: &str);
}

enum UiMessage {
    Evaluate(String),
    Shutdown,
}

/// Owns the script host on a dedicated thread and runs queued statements in
/// the order they were posted.
pub struct UiThread {
    handle: UiHandle,
    thread: Option<JoinHandle<()>>,
}

/// Cloneable sender side of a [`UiThread`].
#[derive(Clone)]
pub struct UiHandle {
    tx: Sender<UiMessage>,
}

impl UiThread {
    pub fn spawn<H: ScriptHost>(mut host: H) -> Result<UiThread> {
        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("ui".to_owned())
            .spawn(move || {
                while let Ok(UiMessage::Evaluate(script)) = rx.recv() {
                    log::debug!("evaluating script: {}", script);
                    host.evaluate_script(&script);
                }
                log::debug!("ui thread stopped");
            })?;
        Ok(UiThread {
            handle: UiHandle { tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> UiHandle {
        self.handle.clone()
    }

    /// Stop after the statements already queued; later posts fail with
    /// `UiThreadClosed`.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.tx.send(UiMessage::Shutdown);
            if thread.join().is_err() {
                log::warn!("ui thread panicked");
            }
        }
    }
}

impl Drop for UiThread {
    fn drop(&mut self) {
        self.stop();
    }
}

impl UiHandle {
    /// Queue `script` for evaluation on the UI thread.
    pub fn evaluate(&self, script: String) -> Result<()> {
        self.tx
            .send(UiMessage::Evaluate(script))
            .map_err(|_| KVStoreError::UiThreadClosed)
    }
}

/// Render `function("arg0", "arg1", ...);` with every argument as an escaped
/// string literal.
pub fn script_call(function: &str, args: &[&str]) -> String {
    let args: Vec<String> = args
        .iter()
        .map(|arg| {
            // JSON allows raw U+2028/U+2029, older script engines end the line there
            Value::String((*arg).to_owned())
                .to_string()
                .replace('\u{2028}', "\\u2028")
                .replace('\u{2029}', "\\u2029")
        })
        .collect();
    format!("{}({});", function, args.join(", "))
}
