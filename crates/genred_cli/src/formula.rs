//! Formula arguments shared by subcommands, and `genred fingerprint`.

use clap::Args;
use genred_cache::{fingerprint, BackendId, Fingerprint};
use genred_formula::{parse_aliases, Axis, FormulaSpec, ReductionOp};

/// A formula as given on the command line.
#[derive(Args, Debug)]
pub struct FormulaArgs {
    /// Formula body, e.g. `Exp(-SqDist(x,y))*b`.
    pub formula: String,

    /// Alias declarations, e.g. `x=Vi(0,3)`. Repeat for each alias.
    #[arg(short, long = "alias", required = true)]
    pub aliases: Vec<String>,

    /// Reduction operator.
    #[arg(short, long, default_value = "Sum")]
    pub reduction: String,

    /// Parameter of `KMin`, `ArgKMin` and `KMinArgKMin`.
    #[arg(short)]
    pub k: Option<u32>,

    /// Reduction axis: 0 gives one row per `i`, 1 one row per `j`.
    #[arg(long, default_value_t = 0)]
    pub axis: usize,

    /// Scalar precision.
    #[arg(short, long, default_value = "float32")]
    pub precision: String,

    /// Target backend.
    #[arg(short, long, default_value = "cpu")]
    pub backend: String,

    /// Extra build flag. Repeat for each flag.
    #[arg(long = "flag", allow_hyphen_values = true)]
    pub flags: Vec<String>,
}

impl FormulaArgs {
    /// Builds the formula spec, backend and fingerprint described by the arguments.
    pub fn resolve(
        &self,
    ) -> Result<(FormulaSpec, BackendId, Fingerprint), Box<dyn std::error::Error>> {
        let aliases = parse_aliases(&self.aliases)?;
        let reduction = ReductionOp::from_name(&self.reduction, self.k)?;
        let spec = FormulaSpec::new(&self.formula, aliases, reduction, self.precision.parse()?)?
            .with_axis(Axis::from_index(self.axis)?)
            .with_flags(&self.flags);
        let backend = BackendId::new(&self.backend)?;
        let fp = fingerprint(&spec, &backend);
        Ok((spec, backend, fp))
    }
}

/// Runs the `genred fingerprint` command.
///
/// Prints the fingerprint on stdout. Returns exit code 0.
pub fn run(args: &FormulaArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let (spec, _, fp) = args.resolve()?;
    tracing::debug!(formula = %spec, "resolved formula");
    println!("{fp}");
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(formula: &str, aliases: &[&str]) -> FormulaArgs {
        FormulaArgs {
            formula: formula.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            reduction: "Sum".to_string(),
            k: None,
            axis: 0,
            precision: "float32".to_string(),
            backend: "cpu".to_string(),
            flags: vec![],
        }
    }

    #[test]
    fn resolve_matches_library_fingerprint() {
        let (spec, backend, fp) = args("x*y", &["x=Vi(0,1)", "y=Vj(1,1)"]).resolve().unwrap();
        assert_eq!(backend, BackendId::cpu());
        assert_eq!(spec.reduction_formula(), "SumReduction(x*y,0)");
        let expected =
            FormulaSpec::parse("x * y", &["y=Vj(1,1)", "x=Vi(0,1)"], "Sum", "float").unwrap();
        assert_eq!(fp, fingerprint(&expected, &BackendId::cpu()));
    }

    #[test]
    fn resolve_applies_k_axis_and_flags() {
        let mut a = args("SqDist(x,y)", &["x=Vi(0,3)", "y=Vj(1,3)"]);
        a.reduction = "ArgKMin".to_string();
        a.k = Some(4);
        a.axis = 1;
        a.flags = vec!["-O3".to_string()];
        let (spec, _, _) = a.resolve().unwrap();
        assert_eq!(spec.reduction_formula(), "ArgKMinReduction(SqDist(x,y),4,1)");
        assert_eq!(spec.flags().collect::<Vec<_>>(), vec!["-O3"]);
    }

    #[test]
    fn resolve_reports_bad_input() {
        let mut a = args("x", &["x=Vi(0,1)"]);
        a.reduction = "Median".to_string();
        assert!(a.resolve().is_err());

        let mut a = args("x", &["x=Vi(0,1)"]);
        a.backend = "CUDA".to_string();
        assert!(a.resolve().is_err());

        let mut a = args("x", &["x=Vi(0,1)"]);
        a.axis = 2;
        assert!(a.resolve().is_err());
    }
}
