//! `genred clean` — remove kernels from the cache.

use genred_cache::Fingerprint;

use crate::list::coordinator;
use crate::{CleanArgs, GlobalArgs};

/// Runs the `genred clean` command.
///
/// Removes the named kernels, or every kernel under the artifact root when
/// none are named. Each removal takes the kernel's build lock, so a build
/// in progress elsewhere finishes first. Returns exit code 0.
pub fn run(args: &CleanArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let coordinator = coordinator(global)?;

    if args.fingerprints.is_empty() {
        let cleaned = coordinator.clean()?;
        if !global.quiet {
            eprintln!("     Removed {cleaned} kernel(s)");
        }
        return Ok(0);
    }

    for fp in parse_fingerprints(&args.fingerprints)? {
        let removed = coordinator.remove(&fp)?;
        if !global.quiet {
            if removed {
                eprintln!("     Removed {fp}");
            } else {
                eprintln!("     Missing {fp}");
            }
        }
    }
    Ok(0)
}

fn parse_fingerprints(names: &[String]) -> Result<Vec<Fingerprint>, String> {
    names
        .iter()
        .map(|name| {
            Fingerprint::from_dir_name(name).ok_or_else(|| format!("not a kernel fingerprint: {name}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const FP: &str = "genred_cpu_float32_0123456789abcdef0123456789abcdef";

    fn global_for(dir: &std::path::Path) -> GlobalArgs {
        let path = dir.join("genred.toml");
        fs::write(
            &path,
            format!("[genred]\nbin_folder = \"{}\"\n", dir.join("kernels").display()),
        )
        .unwrap();
        GlobalArgs {
            quiet: true,
            verbose: false,
            config: Some(path),
        }
    }

    #[test]
    fn rejects_foreign_names() {
        let err = parse_fingerprints(&["../etc".to_string()]).unwrap_err();
        assert!(err.contains("../etc"));
    }

    #[test]
    fn accepts_fingerprints() {
        let parsed = parse_fingerprints(&[FP.to_string()]).unwrap();
        assert_eq!(parsed[0].as_str(), FP);
    }

    #[test]
    fn removes_named_kernel_outputs() {
        if std::env::var_os("GENRED_BIN_FOLDER").is_some() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let global = global_for(dir.path());
        let location = dir.path().join("kernels").join(FP);
        fs::create_dir_all(&location).unwrap();
        fs::write(location.join("libkernel.so"), b"stale").unwrap();

        let args = CleanArgs {
            fingerprints: vec![FP.to_string()],
        };
        assert_eq!(run(&args, &global).unwrap(), 0);
        assert!(!location.join("libkernel.so").exists());
    }

    #[test]
    fn clean_all_on_missing_root() {
        if std::env::var_os("GENRED_BIN_FOLDER").is_some() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let global = global_for(dir.path());
        let args = CleanArgs {
            fingerprints: Vec::new(),
        };
        assert_eq!(run(&args, &global).unwrap(), 0);
    }
}
