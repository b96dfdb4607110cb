use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lightfast_compiler::compiler::{Transpiler, TranspileOutput};
use lightfast_compiler::errors::Result;

/// A fake transpiler that:
/// - records which entry points were "transpiled"
/// - returns a canned [`TranspileOutput`] without spawning a process.
///
/// The canned output can be swapped mid-test to simulate a source edit, and
/// an optional delay makes in-flight compiles observable for single-flight
/// tests.
pub struct FakeTranspiler {
    output: Mutex<TranspileOutput>,
    calls: Arc<Mutex<Vec<PathBuf>>>,
    delay: Option<Duration>,
}

impl FakeTranspiler {
    pub fn new(output: TranspileOutput) -> Self {
        Self {
            output: Mutex::new(output),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace the canned output for subsequent calls.
    pub fn set_output(&self, output: TranspileOutput) {
        *self.output.lock().unwrap() = output;
    }

    /// Shared handle to the call log.
    pub fn calls(&self) -> Arc<Mutex<Vec<PathBuf>>> {
        Arc::clone(&self.calls)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Transpiler for FakeTranspiler {
    fn transpile(
        &self,
        entry: &Path,
        _base_dir: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<TranspileOutput>> + Send + '_>> {
        let entry = entry.to_path_buf();
        let output = self.output.lock().unwrap().clone();
        let calls = Arc::clone(&self.calls);
        let delay = self.delay;

        Box::pin(async move {
            {
                let mut guard = calls.lock().unwrap();
                guard.push(entry);
            }
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(output)
        })
    }
}
