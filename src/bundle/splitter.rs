// src/bundle/splitter.rs

//! Splits one compiled config module into N independently addressable
//! bundles, one per declared agent.
//!
//! Filenames are content-addressed (`{id}.{hash8}.js`), so concurrent calls
//! for different sources write disjoint entries, and regenerating identical
//! content is an effective no-op.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::bundle::scan::{scan_agents, AgentRef};
use crate::cache::hash::{content_hash, short_hash};

/// Identity metadata embedded alongside each bundle.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BundleMetadata {
    pub id: String,
    pub hash: String,
    pub name: String,
    pub tools: Vec<String>,
    pub models: Vec<String>,
    /// ISO-8601 compile timestamp.
    pub compiled_at: String,
    pub compiler_version: String,
}

/// One persisted agent bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// Declared agent id (unsanitized; see `filename` for the disk form).
    pub id: String,
    /// Digest of the rendered bundle content (pre-footer), used for the
    /// content-addressed filename.
    pub hash: String,
    pub filename: String,
    pub filepath: PathBuf,
    pub size: u64,
    pub metadata: BundleMetadata,
}

/// Split `code` into one bundle per declared agent and persist them under
/// `out_dir`. Zero discovered agents produce exactly one fallback bundle
/// with id `"main"`. The whole-file sourcemap, when present, is copied next
/// to every bundle; per-agent sourcemap splitting is a known simplification.
pub fn generate_bundles(
    code: &str,
    sourcemap: Option<&str>,
    source_path: &Path,
    out_dir: &Path,
    compiler_version: &str,
) -> Result<Vec<Bundle>> {
    let mut agents = scan_agents(code);
    if agents.is_empty() {
        debug!(source = ?source_path, "no agents discovered; emitting fallback bundle");
        agents.push(AgentRef {
            id: "main".to_string(),
            name: None,
            tools: Vec::new(),
            models: Vec::new(),
        });
    }

    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating bundle output dir {:?}", out_dir))?;

    let compiled_at = Utc::now().to_rfc3339();
    let mut bundles = Vec::with_capacity(agents.len());

    for agent in agents {
        let rendered = render_bundle(code, &agent, source_path, compiler_version);
        // The hash covers the rendered module; the footer line carrying it
        // is appended afterwards.
        let hash = content_hash(rendered.as_bytes());
        let contents = format!("{rendered}export const bundleHash = {};\n", js_string(&hash));

        let filename = format!("{}.{}.js", sanitize_id(&agent.id), short_hash(&hash));
        let filepath = out_dir.join(&filename);

        fs::write(&filepath, &contents)
            .with_context(|| format!("writing bundle {:?}", filepath))?;

        if let Some(map) = sourcemap {
            let map_path = out_dir.join(format!("{filename}.map"));
            fs::write(&map_path, map)
                .with_context(|| format!("writing bundle sourcemap {:?}", map_path))?;
        }

        let size = fs::metadata(&filepath)
            .with_context(|| format!("statting bundle {:?}", filepath))?
            .len();

        let metadata = BundleMetadata {
            id: agent.id.clone(),
            hash: hash.clone(),
            name: agent.name.clone().unwrap_or_else(|| agent.id.clone()),
            tools: agent.tools.clone(),
            models: agent.models.clone(),
            compiled_at: compiled_at.clone(),
            compiler_version: compiler_version.to_string(),
        };

        info!(agent = %agent.id, file = %filename, size, "wrote agent bundle");

        bundles.push(Bundle {
            id: agent.id,
            hash,
            filename,
            filepath,
            size,
            metadata,
        });
    }

    Ok(bundles)
}

fn render_bundle(
    code: &str,
    agent: &AgentRef,
    source_path: &Path,
    compiler_version: &str,
) -> String {
    format!(
        "// Generated by the lightfast compiler v{version} -- do not edit.\n\
         // source: {source}\n\
         // agent: {id}\n\
         {code}\n\
         export const targetAgentId = {id_json};\n\
         export const compilerVersion = {version_json};\n\
         export function getTargetAgent(config) {{\n\
         \x20 const agents = (config && config.agents) || {{}};\n\
         \x20 return agents[targetAgentId];\n\
         }}\n",
        version = compiler_version,
        source = source_path.display(),
        id = agent.id,
        id_json = js_string(&agent.id),
        version_json = js_string(compiler_version),
    )
}

/// Restrict ids to `[a-zA-Z0-9._-]` for filename use; the unsanitized id is
/// retained in the bundle metadata for display.
fn sanitize_id(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "agent".to_string()
    } else {
        sanitized
    }
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}
