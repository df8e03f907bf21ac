//! `genred build` — compile a formula into the kernel cache.

use std::sync::Arc;

use genred_cache::{BuildCoordinator, CommandCompiler};

use crate::{BuildArgs, GlobalArgs};

/// Runs the `genred build` command.
///
/// Builds with the configured generator command unless the kernel is
/// already published (or `--force` is given) and prints the library path.
/// Returns exit code 0 on success.
pub fn run(args: &BuildArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = Arc::new(global.process_config()?);
    let compiler = CommandCompiler::from_config(&config).ok_or(
        "no kernel generator configured; set GENRED_COMPILER or `compiler` in genred.toml",
    )?;
    let (spec, backend, fp) = args.formula.resolve()?;

    let coordinator = BuildCoordinator::new(Arc::clone(&config), Arc::new(compiler));
    if !args.force && !config.build_mode.always_rebuild() {
        if let Some(published) = coordinator.published(&fp) {
            if !global.quiet {
                eprintln!("      Fresh {fp}");
            }
            println!("{}", published.library_path().display());
            return Ok(0);
        }
    }

    if !global.quiet {
        eprintln!("  Compiling {spec}");
    }
    let published = if args.force {
        coordinator.ensure_built_forced(&spec, &backend, &fp)?
    } else {
        coordinator.ensure_built(&spec, &backend, &fp)?
    };
    if !global.quiet {
        eprintln!("   Finished {fp}");
    }
    println!("{}", published.library_path().display());
    Ok(0)
}
