#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use lightfast_compiler::compiler::{Metafile, TranspileOutput};
use tempfile::TempDir;

/// Builder for `TranspileOutput` to simplify test setup.
pub struct TranspileOutputBuilder {
    output: TranspileOutput,
    inputs: Vec<String>,
}

impl TranspileOutputBuilder {
    pub fn new(code: &str) -> Self {
        Self {
            output: TranspileOutput {
                code: code.to_string(),
                ..TranspileOutput::default()
            },
            inputs: Vec::new(),
        }
    }

    pub fn warning(mut self, message: &str) -> Self {
        self.output.warnings.push(message.to_string());
        self
    }

    pub fn error(mut self, message: &str) -> Self {
        self.output.errors.push(message.to_string());
        self
    }

    pub fn sourcemap(mut self, map: &str) -> Self {
        self.output.sourcemap = Some(map.to_string());
        self
    }

    /// Add a metafile input path (relative to the project directory).
    pub fn input(mut self, path: &str) -> Self {
        self.inputs.push(path.to_string());
        self
    }

    pub fn build(self) -> TranspileOutput {
        let mut output = self.output;
        if !self.inputs.is_empty() {
            output.metafile = Some(Metafile::from_inputs(self.inputs));
        }
        output
    }
}

/// A throwaway on-disk project directory with config and dependency files.
pub struct TempProject {
    dir: TempDir,
}

impl TempProject {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp project dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `lightfast.config.ts` with the given source, returning its path.
    pub fn write_config(&self, source: &str) -> PathBuf {
        self.write_file("lightfast.config.ts", source)
    }

    /// Write a file relative to the project root, creating parent dirs.
    pub fn write_file(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent dirs");
        }
        fs::write(&path, contents).expect("failed to write project file");
        path
    }
}

impl Default for TempProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal config source declaring the given agents, in the shape the
/// bundle scanner understands.
pub fn agents_source(ids: &[&str]) -> String {
    let entries: Vec<String> = ids
        .iter()
        .map(|id| format!("    {id}: {{ name: \"{id}\" }}"))
        .collect();
    format!(
        "export const app = createLightfast({{\n  agents: {{\n{}\n  }}\n}});\n",
        entries.join(",\n")
    )
}
