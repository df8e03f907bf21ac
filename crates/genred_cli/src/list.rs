//! `genred list` — show published kernels.

use std::sync::Arc;

use genred_cache::{BuildCoordinator, CompileFailure, CompileRequest, Compiler, PublishedArtifact};

use crate::{GlobalArgs, ListArgs, ReportFormat};

/// Listing never builds; this compiler only satisfies the coordinator.
struct NoCompiler;

impl Compiler for NoCompiler {
    fn compile(
        &self,
        _: &CompileRequest<'_>,
    ) -> Result<std::path::PathBuf, CompileFailure> {
        Err(CompileFailure::message("building is not available here"))
    }
}

/// Opens the cache without a generator, for commands that never build.
pub(crate) fn coordinator(global: &GlobalArgs) -> Result<BuildCoordinator, Box<dyn std::error::Error>> {
    let config = global.process_config()?;
    Ok(BuildCoordinator::new(Arc::new(config), Arc::new(NoCompiler)))
}

/// Runs the `genred list` command.
///
/// Prints one line per published kernel, or a JSON array with `--format
/// json`. Returns exit code 0.
pub fn run(args: &ListArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let coordinator = coordinator(global)?;
    let published = coordinator.list()?;

    match args.format {
        ReportFormat::Text => {
            if published.is_empty() && !global.quiet {
                eprintln!(
                    "no kernels in {}",
                    coordinator.config().artifact_root.display()
                );
            }
            for artifact in &published {
                println!("{}", render_text(artifact));
            }
        }
        ReportFormat::Json => {
            println!("{}", render_json(&published)?);
        }
    }
    Ok(0)
}

fn render_text(artifact: &PublishedArtifact) -> String {
    let m = &artifact.manifest;
    format!(
        "{}  {}  [{}]  {}",
        m.fingerprint, m.formula, m.aliases, m.precision
    )
}

fn render_json(published: &[PublishedArtifact]) -> Result<String, serde_json::Error> {
    let entries: Vec<serde_json::Value> = published
        .iter()
        .map(|artifact| {
            serde_json::json!({
                "location": artifact.location,
                "library": artifact.library_path(),
                "manifest": artifact.manifest,
            })
        })
        .collect();
    serde_json::to_string_pretty(&entries)
}
