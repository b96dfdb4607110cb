// src/compiler/command.rs

//! Production transpiler backend that shells out to an external bundler.
//!
//! The bundler command is invoked with the entry path appended and the base
//! directory as its working directory, and must print a JSON
//! [`TranspileOutput`] on stdout. A non-zero exit status with parseable
//! output is fine: compile errors travel inside the payload, not through the
//! exit code.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::{anyhow, Context};
use tokio::process::Command;
use tracing::{debug, info};

use crate::compiler::{Transpiler, TranspileOutput};
use crate::errors::Result;

pub struct CommandTranspiler {
    command: String,
}

impl CommandTranspiler {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Transpiler for CommandTranspiler {
    fn transpile(
        &self,
        entry: &Path,
        base_dir: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<TranspileOutput>> + Send + '_>> {
        let command = self.command.clone();
        let entry = entry.to_path_buf();
        let base_dir = base_dir.to_path_buf();

        Box::pin(async move {
            info!(cmd = %command, entry = ?entry, "invoking transpiler");

            let shell_line = format!("{} {}", command, shell_quote(&entry.to_string_lossy()));

            // Build a shell command appropriate for the platform.
            let mut cmd = if cfg!(windows) {
                let mut c = Command::new("cmd");
                c.arg("/C").arg(&shell_line);
                c
            } else {
                let mut c = Command::new("sh");
                c.arg("-c").arg(&shell_line);
                c
            };

            let output = cmd
                .current_dir(&base_dir)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
                .with_context(|| format!("spawning transpiler command '{command}'"))?;

            debug!(
                status = ?output.status.code(),
                stdout_len = output.stdout.len(),
                "transpiler exited"
            );

            let parsed: TranspileOutput = serde_json::from_slice(&output.stdout)
                .map_err(|err| {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    anyhow!(
                        "transpiler produced unparseable output ({err}); stderr: {}",
                        stderr.trim()
                    )
                })?;

            Ok(parsed)
        })
    }
}

fn shell_quote(s: &str) -> String {
    if s.chars().all(|c| c.is_ascii_alphanumeric() || "./_-".contains(c)) {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}
