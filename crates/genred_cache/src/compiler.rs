//! The external code generator and toolchain, seen from the cache.
//!
//! [`Compiler`] is the seam to whatever turns a [`FormulaSpec`] into a
//! shared library. [`CommandCompiler`] drives an external generator command
//! and is what the CLI and most embedders use; tests substitute their own
//! implementation.

use std::path::{Path, PathBuf};
use std::process::Command;

use genred_common::ContentHash;
use genred_config::{CompilerCommand, ProcessConfig};
use genred_formula::FormulaSpec;

use crate::fingerprint::{BackendId, Fingerprint};

/// Everything the generator needs to build one kernel.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    /// The formula to compile.
    pub spec: &'a FormulaSpec,
    /// Target backend.
    pub backend: &'a BackendId,
    /// Name the kernel is built and loaded under.
    pub fingerprint: &'a Fingerprint,
    /// Exclusive output directory for this build.
    pub build_dir: &'a Path,
}

/// A failed compilation, as reported by the toolchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileFailure {
    /// Exit status, when the toolchain ran to completion.
    pub status: Option<i32>,
    /// Captured diagnostics.
    pub diagnostics: String,
}

impl CompileFailure {
    /// A failure with no exit status (the toolchain did not run).
    pub fn message(diagnostics: impl Into<String>) -> Self {
        Self {
            status: None,
            diagnostics: diagnostics.into(),
        }
    }
}

/// Builds a kernel library for a formula.
///
/// Implementations write only inside `request.build_dir` and return the
/// path of the produced shared library.
pub trait Compiler: Send + Sync {
    /// Compiles one kernel. Called with the build location locked.
    fn compile(&self, request: &CompileRequest<'_>) -> Result<PathBuf, CompileFailure>;
}

/// Platform file name of the library built for `fingerprint`.
pub fn library_file_name(fingerprint: &Fingerprint) -> String {
    format!(
        "{}{}{}",
        std::env::consts::DLL_PREFIX,
        fingerprint,
        std::env::consts::DLL_SUFFIX
    )
}

/// File name a built library is published under.
///
/// Carries part of the library checksum so that a rebuild with different
/// code gets a new path. The dynamic loader reuses an already-loaded object
/// opened by the same name, so reusing one path would keep serving the old
/// code to this process.
pub fn published_library_name(fingerprint: &Fingerprint, checksum: &ContentHash) -> String {
    let hex = checksum.to_hex();
    format!(
        "{}{}-{}{}",
        std::env::consts::DLL_PREFIX,
        fingerprint,
        &hex[..16],
        std::env::consts::DLL_SUFFIX
    )
}

/// Runs an external generator command.
///
/// The command receives the configured leading arguments followed by
/// `--formula`, `--aliases`, `--precision`, `--backend`, `--name`,
/// `--library`, `--out-dir`, and one `--flag` per build flag. It must leave
/// the library at `<out-dir>/<library>`.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    command: CompilerCommand,
}

impl CommandCompiler {
    /// Creates a driver for the given command.
    pub fn new(command: CompilerCommand) -> Self {
        Self { command }
    }

    /// Creates a driver from the configured generator command, if any.
    pub fn from_config(config: &ProcessConfig) -> Option<Self> {
        config.compiler.clone().map(Self::new)
    }

    fn command_for(&self, request: &CompileRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .arg("--formula")
            .arg(request.spec.reduction_formula())
            .arg("--aliases")
            .arg(request.spec.alias_signature())
            .arg("--precision")
            .arg(request.spec.precision().name())
            .arg("--backend")
            .arg(request.backend.as_str())
            .arg("--name")
            .arg(request.fingerprint.as_str())
            .arg("--library")
            .arg(library_file_name(request.fingerprint))
            .arg("--out-dir")
            .arg(request.build_dir);
        for flag in request.spec.flags() {
            cmd.arg("--flag").arg(flag);
        }
        cmd.current_dir(request.build_dir);
        cmd
    }
}

impl Compiler for CommandCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<PathBuf, CompileFailure> {
        let mut cmd = self.command_for(request);
        tracing::debug!(command = ?cmd, "running kernel generator");

        let output = cmd.output().map_err(|e| {
            CompileFailure::message(format!("failed to run '{}': {e}", self.command.program))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let mut diagnostics = stderr.trim_end().to_string();
            if !stdout.trim().is_empty() {
                if !diagnostics.is_empty() {
                    diagnostics.push('\n');
                }
                diagnostics.push_str(stdout.trim_end());
            }
            return Err(CompileFailure {
                status: output.status.code(),
                diagnostics,
            });
        }
        if !stdout.trim().is_empty() {
            tracing::debug!(output = %stdout.trim_end(), "kernel generator output");
        }

        let library = request
            .build_dir
            .join(library_file_name(request.fingerprint));
        if !library.is_file() {
            return Err(CompileFailure::message(format!(
                "'{}' succeeded but did not produce {}",
                self.command.program,
                library.display()
            )));
        }
        Ok(library)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_parts() -> (tempfile::TempDir, FormulaSpec, BackendId, Fingerprint) {
        let dir = tempfile::tempdir().unwrap();
        let spec = FormulaSpec::parse("x*y", &["x=Vi(0,1)", "y=Vj(1,1)"], "Sum", "float32")
            .unwrap()
            .with_flags(["-O3"]);
        let backend = BackendId::cpu();
        let fp = crate::fingerprint(&spec, &backend);
        (dir, spec, backend, fp)
    }

    #[test]
    fn library_name_uses_platform_affixes() {
        let name = library_file_name(&Fingerprint::from_raw("genred_cpu_float32_ab"));
        assert!(name.contains("genred_cpu_float32_ab"));
        assert!(name.ends_with(std::env::consts::DLL_SUFFIX));
    }

    #[test]
    fn published_name_tracks_content() {
        let fp = Fingerprint::from_raw("genred_cpu_float32_ab");
        let a = published_library_name(&fp, &ContentHash::from_bytes(b"build #1"));
        let b = published_library_name(&fp, &ContentHash::from_bytes(b"build #2"));
        assert_ne!(a, b);
        assert!(a.contains("genred_cpu_float32_ab-"));
        assert!(a.ends_with(std::env::consts::DLL_SUFFIX));
        assert_eq!(
            a,
            published_library_name(&fp, &ContentHash::from_bytes(b"build #1"))
        );
    }

    #[test]
    fn command_line_carries_request() {
        let (dir, spec, backend, fp) = request_parts();
        let compiler = CommandCompiler::new(CompilerCommand {
            program: "genred-codegen".to_string(),
            args: vec!["--verbose".to_string()],
        });
        let request = CompileRequest {
            spec: &spec,
            backend: &backend,
            fingerprint: &fp,
            build_dir: dir.path(),
        };
        let cmd = compiler.command_for(&request);
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "--verbose");
        let pos = args.iter().position(|a| a == "--formula").unwrap();
        assert_eq!(args[pos + 1], "SumReduction(x*y,0)");
        let pos = args.iter().position(|a| a == "--name").unwrap();
        assert_eq!(args[pos + 1], fp.as_str());
        let pos = args.iter().position(|a| a == "--flag").unwrap();
        assert_eq!(args[pos + 1], "-O3");
    }

    #[test]
    fn missing_program_is_a_failure_without_status() {
        let (dir, spec, backend, fp) = request_parts();
        let compiler = CommandCompiler::new(CompilerCommand {
            program: "/nonexistent/genred-codegen".to_string(),
            args: vec![],
        });
        let failure = compiler
            .compile(&CompileRequest {
                spec: &spec,
                backend: &backend,
                fingerprint: &fp,
                build_dir: dir.path(),
            })
            .unwrap_err();
        assert_eq!(failure.status, None);
        assert!(failure.diagnostics.contains("failed to run"));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_captures_diagnostics() {
        let (dir, spec, backend, fp) = request_parts();
        let compiler = CommandCompiler::new(CompilerCommand {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo 'error: unknown operation Foo' >&2; exit 3".to_string(),
                "genred-codegen".to_string(),
            ],
        });
        let failure = compiler
            .compile(&CompileRequest {
                spec: &spec,
                backend: &backend,
                fingerprint: &fp,
                build_dir: dir.path(),
            })
            .unwrap_err();
        assert_eq!(failure.status, Some(3));
        assert!(failure.diagnostics.contains("unknown operation Foo"));
    }

    #[cfg(unix)]
    #[test]
    fn success_without_library_is_a_failure() {
        let (dir, spec, backend, fp) = request_parts();
        let compiler = CommandCompiler::new(CompilerCommand {
            program: "true".to_string(),
            args: vec![],
        });
        let failure = compiler
            .compile(&CompileRequest {
                spec: &spec,
                backend: &backend,
                fingerprint: &fp,
                build_dir: dir.path(),
            })
            .unwrap_err();
        assert!(failure.diagnostics.contains("did not produce"));
    }

    #[cfg(unix)]
    #[test]
    fn success_returns_library_path() {
        let (dir, spec, backend, fp) = request_parts();
        let script = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --out-dir) out="$2"; shift ;;
    --library) lib="$2"; shift ;;
  esac
  shift
done
printf 'fake kernel' > "$out/$lib"
"#;
        let compiler = CommandCompiler::new(CompilerCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "genred-codegen".to_string()],
        });
        let library = compiler
            .compile(&CompileRequest {
                spec: &spec,
                backend: &backend,
                fingerprint: &fp,
                build_dir: dir.path(),
            })
            .unwrap();
        assert_eq!(library, dir.path().join(library_file_name(&fp)));
        assert_eq!(std::fs::read(&library).unwrap(), b"fake kernel");
    }

    #[test]
    fn from_config_requires_command() {
        let config = ProcessConfig::new("/tmp/genred");
        assert!(CommandCompiler::from_config(&config).is_none());
    }
}
