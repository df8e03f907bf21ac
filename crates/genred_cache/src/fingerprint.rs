//! Deterministic naming of compiled kernels.
//!
//! A fingerprint is `genred_<backend>_<precision>_<hash>`, where `<hash>` is
//! the XXH3-128 of a length-prefixed encoding of the canonical spec. The
//! encoding only reads canonicalized fields of [`FormulaSpec`], so cosmetic
//! differences in how a caller wrote the formula never change the name.

use serde::{Deserialize, Serialize};
use std::fmt;

use genred_common::ContentHash;
use genred_formula::{Category, FormulaSpec};

use crate::error::CacheError;

/// Bumped whenever the encoding below changes, so that old cache entries
/// are never mistaken for new ones.
const FINGERPRINT_VERSION: u32 = 1;

const PREFIX: &str = "genred";

/// Identifier of the code-generation target (e.g. `cpu`, `cuda`).
///
/// Restricted to `[a-z0-9_]+` so that it can be embedded in file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendId(String);

impl BackendId {
    /// Validates and wraps a backend name.
    pub fn new(name: &str) -> Result<Self, CacheError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(CacheError::InvalidBackend(name.to_string()))
        }
    }

    /// The host CPU backend.
    pub fn cpu() -> Self {
        Self("cpu".to_string())
    }

    /// The CUDA backend.
    pub fn cuda() -> Self {
        Self("cuda".to_string())
    }

    /// The backend name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque, filesystem-safe cache key and load name of one compiled kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps a name without validation.
    ///
    /// Intended for deserialization and tests. Use [`fingerprint`] to derive
    /// one from a spec.
    pub fn from_raw(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Recognizes a directory name produced by [`fingerprint`].
    pub fn from_dir_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(PREFIX)?.strip_prefix('_')?;
        let (head, hash) = rest.rsplit_once('_')?;
        let well_formed = hash.parse::<ContentHash>().is_ok()
            && head.contains('_')
            && head
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        well_formed.then(|| Self(name.to_string()))
    }

    /// The fingerprint as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the fingerprint of `spec` compiled for `backend`.
///
/// Pure and total: equal inputs always produce equal names.
pub fn fingerprint(spec: &FormulaSpec, backend: &BackendId) -> Fingerprint {
    let mut enc = Encoder::default();
    enc.u32(FINGERPRINT_VERSION);
    enc.str(&spec.reduction_formula());
    enc.u64(spec.aliases().len() as u64);
    for alias in spec.aliases() {
        enc.str(&alias.name);
        enc.u32(match alias.category {
            Category::I => 0,
            Category::J => 1,
            Category::Param => 2,
        });
        enc.u64(alias.position as u64);
        enc.u64(alias.dim as u64);
    }
    enc.str(spec.precision().name());
    enc.str(backend.as_str());
    let flags: Vec<&str> = spec.flags().collect();
    enc.u64(flags.len() as u64);
    for flag in flags {
        enc.str(flag);
    }

    let hash = ContentHash::from_bytes(&enc.buf);
    Fingerprint(format!(
        "{PREFIX}_{}_{}_{hash}",
        backend.as_str(),
        spec.precision().name()
    ))
}

/// Length-prefixed little-endian encoding; unambiguous for any field values.
#[derive(Default)]
struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn str(&mut self, s: &str) {
        self.u64(s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genred_formula::{Axis, ReductionOp};
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn spec(formula: &str, aliases: &[&str], reduction: &str, precision: &str) -> FormulaSpec {
        FormulaSpec::parse(formula, aliases, reduction, precision).unwrap()
    }

    #[test]
    fn name_shape() {
        let fp = fingerprint(
            &spec("x*y", &["x=Vi(0,1)", "y=Vj(1,1)"], "Sum", "float32"),
            &BackendId::cpu(),
        );
        assert!(fp.as_str().starts_with("genred_cpu_float32_"));
        assert_eq!(Fingerprint::from_dir_name(fp.as_str()), Some(fp.clone()));
        assert!(fp
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn reordered_aliases_fingerprint_identically() {
        let backend = BackendId::cpu();
        let a = spec(
            "Exp(-SqDist(x,y))*b",
            &["x = Vi(0,3)", "y = Vj(1,3)", "b = Vj(2,1)"],
            "Sum",
            "float32",
        );
        let b = spec(
            "Exp(-SqDist(x, y)) * b",
            &["b=Vj(2,1)", "y=Vj(1,3)", "x=Vi(0,3)"],
            "Sum",
            "float",
        );
        assert_eq!(fingerprint(&a, &backend), fingerprint(&b, &backend));
    }

    #[test]
    fn each_component_changes_the_name() {
        let backend = BackendId::cpu();
        let base = spec("x*y", &["x=Vi(0,1)", "y=Vj(1,1)"], "Sum", "float32");
        let base_fp = fingerprint(&base, &backend);

        let variants = [
            spec("x+y", &["x=Vi(0,1)", "y=Vj(1,1)"], "Sum", "float32"),
            spec("x*y", &["x=Vi(0,1)", "y=Vj(1,1)"], "LogSumExp", "float32"),
            spec("x*y", &["x=Vi(0,1)", "y=Vj(1,1)"], "Sum", "float64"),
            spec("x*y", &["x=Vi(0,2)", "y=Vj(1,1)"], "Sum", "float32"),
            spec("x*y", &["x=Vj(0,1)", "y=Vi(1,1)"], "Sum", "float32"),
            base.clone().with_axis(Axis::J),
            base.clone().with_flags(["-O3"]),
        ];
        for variant in &variants {
            assert_ne!(fingerprint(variant, &backend), base_fp, "{variant}");
        }
        assert_ne!(fingerprint(&base, &BackendId::cuda()), base_fp);
    }

    #[test]
    fn k_parameter_changes_the_name() {
        let backend = BackendId::cpu();
        let base = spec("x*y", &["x=Vi(0,1)", "y=Vj(1,1)"], "Sum", "float32");
        let k3 = fingerprint(&base.clone().with_reduction(ReductionOp::KMin(3)), &backend);
        let k4 = fingerprint(&base.with_reduction(ReductionOp::KMin(4)), &backend);
        assert_ne!(k3, k4);
    }

    #[test]
    fn backend_validation() {
        assert!(BackendId::new("cuda_sm80").is_ok());
        for bad in ["", "CPU", "gpu-1", "a/b", "c u"] {
            assert!(matches!(
                BackendId::new(bad),
                Err(CacheError::InvalidBackend(_))
            ));
        }
    }

    #[test]
    fn dir_name_recognition() {
        assert!(Fingerprint::from_dir_name("build.lock").is_none());
        assert!(Fingerprint::from_dir_name("genred_cpu_float32_xyz").is_none());
        assert!(Fingerprint::from_dir_name("genred_float32_00000000000000000000000000000000").is_none());
        assert!(
            Fingerprint::from_dir_name("genred_cpu_float32_00000000000000000000000000000000")
                .is_some()
        );
    }

    fn arb_spec() -> impl Strategy<Value = (FormulaSpec, BackendId)> {
        let ops = prop_oneof![
            Just("Sum"),
            Just("Max"),
            Just("Min"),
            Just("ArgMin"),
            Just("LogSumExp")
        ];
        let precisions = prop_oneof![Just("float32"), Just("float64")];
        let backends = prop_oneof![Just("cpu"), Just("cuda")];
        (
            "[a-z]{1,3}([*+-][a-z]{1,3}){0,3}",
            proptest::collection::vec((0u8..3, 1usize..5), 1..4),
            ops,
            precisions,
            backends,
            0usize..2,
        )
            .prop_map(|(formula, cats, op, precision, backend, axis)| {
                let aliases: Vec<String> = cats
                    .iter()
                    .enumerate()
                    .map(|(pos, (cat, dim))| {
                        let kw = ["Vi", "Vj", "Pm"][*cat as usize];
                        format!("a{pos}={kw}({pos},{dim})")
                    })
                    .collect();
                let spec = FormulaSpec::parse(&formula, &aliases, op, precision)
                    .unwrap()
                    .with_axis(Axis::from_index(axis).unwrap());
                (spec, BackendId::new(backend).unwrap())
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn distinct_specs_never_collide(
            samples in proptest::collection::vec(arb_spec(), 50..200)
        ) {
            let mut seen: HashMap<Fingerprint, (FormulaSpec, BackendId)> = HashMap::new();
            for (spec, backend) in samples {
                let fp = fingerprint(&spec, &backend);
                if let Some((prev_spec, prev_backend)) = seen.get(&fp) {
                    prop_assert_eq!(prev_spec, &spec);
                    prop_assert_eq!(prev_backend, &backend);
                } else {
                    seen.insert(fp, (spec, backend));
                }
            }
        }

        #[test]
        fn fingerprint_is_deterministic((spec, backend) in arb_spec()) {
            prop_assert_eq!(fingerprint(&spec, &backend), fingerprint(&spec.clone(), &backend.clone()));
        }
    }
}
