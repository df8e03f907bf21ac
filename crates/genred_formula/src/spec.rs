//! The complete, canonical definition of one reduction kernel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::alias::{self, Alias, Category};
use crate::error::FormulaError;
use crate::precision::Precision;
use crate::reduction::{Axis, ReductionOp};

/// Immutable definition of a reduction: everything that determines the
/// compiled kernel.
///
/// All fields are canonicalized at construction: formula whitespace is
/// stripped, aliases are sorted by position and flags form a sorted set.
/// Two specs built from semantically identical inputs are therefore `==`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormulaSpec {
    formula: String,
    reduction: ReductionOp,
    axis: Axis,
    aliases: Vec<Alias>,
    precision: Precision,
    flags: BTreeSet<String>,
}

impl FormulaSpec {
    /// Builds a spec from already-typed parts.
    pub fn new(
        formula: &str,
        aliases: Vec<Alias>,
        reduction: ReductionOp,
        precision: Precision,
    ) -> Result<Self, FormulaError> {
        let formula = canonical_formula(formula)?;
        let aliases = alias::canonicalize(aliases)?;
        Ok(Self {
            formula,
            reduction,
            axis: Axis::default(),
            aliases,
            precision,
            flags: BTreeSet::new(),
        })
    }

    /// Builds a spec from the textual forms callers usually have at hand.
    ///
    /// ```
    /// use genred_formula::FormulaSpec;
    ///
    /// let spec = FormulaSpec::parse("x*y", &["x = Vi(0,1)", "y = Vj(1,1)"], "Sum", "float32")?;
    /// assert_eq!(spec.reduction_formula(), "SumReduction(x*y,0)");
    /// # Ok::<(), genred_formula::FormulaError>(())
    /// ```
    pub fn parse<S: AsRef<str>>(
        formula: &str,
        aliases: &[S],
        reduction: &str,
        precision: &str,
    ) -> Result<Self, FormulaError> {
        let aliases = alias::parse_aliases(aliases)?;
        let reduction = ReductionOp::from_name(reduction, None)?;
        let precision = precision.parse::<Precision>()?;
        Self::new(formula, aliases, reduction, precision)
    }

    /// Returns a copy reducing along `axis`.
    pub fn with_axis(mut self, axis: Axis) -> Self {
        self.axis = axis;
        self
    }

    /// Returns a copy using `reduction`.
    pub fn with_reduction(mut self, reduction: ReductionOp) -> Self {
        self.reduction = reduction;
        self
    }

    /// Returns a copy with additional build flags. Order and duplicates are
    /// irrelevant; blank flags are dropped.
    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.flags.extend(
            flags
                .into_iter()
                .map(|f| f.as_ref().trim().to_string())
                .filter(|f| !f.is_empty()),
        );
        self
    }

    /// The canonical (whitespace-free) formula body.
    pub fn formula(&self) -> &str {
        &self.formula
    }

    /// The reduction operator.
    pub fn reduction(&self) -> ReductionOp {
        self.reduction
    }

    /// The reduction axis.
    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Aliases in position order.
    pub fn aliases(&self) -> &[Alias] {
        &self.aliases
    }

    /// Aliases of the given category, in position order.
    pub fn aliases_of(&self, category: Category) -> impl Iterator<Item = &Alias> {
        self.aliases.iter().filter(move |a| a.category == category)
    }

    /// Numeric precision.
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Build flags in sorted order.
    pub fn flags(&self) -> impl Iterator<Item = &str> {
        self.flags.iter().map(String::as_str)
    }

    /// The formula wrapped in its reduction, as handed to the generator:
    /// `<Op>Reduction(<formula>[,<K>],<axis>)`.
    pub fn reduction_formula(&self) -> String {
        match self.reduction.parameter() {
            Some(k) => format!(
                "{}Reduction({},{},{})",
                self.reduction.name(),
                self.formula,
                k,
                self.axis.category_tag()
            ),
            None => format!(
                "{}Reduction({},{})",
                self.reduction.name(),
                self.formula,
                self.axis.category_tag()
            ),
        }
    }

    /// Aliases rendered canonically and joined with `;`.
    pub fn alias_signature(&self) -> String {
        self.aliases
            .iter()
            .map(Alias::to_string)
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl fmt::Display for FormulaSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] ({})",
            self.reduction_formula(),
            self.alias_signature(),
            self.precision
        )
    }
}

fn canonical_formula(formula: &str) -> Result<String, FormulaError> {
    let compact: String = formula.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(FormulaError::EmptyFormula);
    }
    let mut depth: i64 = 0;
    for c in compact.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(FormulaError::UnbalancedParentheses(compact));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(FormulaError::UnbalancedParentheses(compact));
    }
    Ok(compact)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian() -> FormulaSpec {
        FormulaSpec::parse(
            "Exp(-SqDist(x,y)) * b",
            &["x = Vi(0,3)", "y = Vj(1,3)", "b = Vj(2,1)"],
            "Sum",
            "float32",
        )
        .unwrap()
    }

    #[test]
    fn whitespace_is_canonicalized() {
        let spec = gaussian();
        assert_eq!(spec.formula(), "Exp(-SqDist(x,y))*b");
        let other = FormulaSpec::parse(
            "Exp( -SqDist( x, y ) )*b",
            &["x=Vi(0,3)", "y=Vj(1,3)", "b=Vj(2,1)"],
            "Sum",
            "f32",
        )
        .unwrap();
        assert_eq!(spec, other);
    }

    #[test]
    fn alias_order_is_canonicalized() {
        let reordered = FormulaSpec::parse(
            "Exp(-SqDist(x,y))*b",
            &["b = Vj(2,1)", "x = Vi(0,3)", "y = Vj(1,3)"],
            "Sum",
            "float",
        )
        .unwrap();
        assert_eq!(gaussian(), reordered);
    }

    #[test]
    fn reduction_formula_wraps_body() {
        let spec = gaussian();
        assert_eq!(
            spec.reduction_formula(),
            "SumReduction(Exp(-SqDist(x,y))*b,0)"
        );
        let spec = spec.with_axis(Axis::J);
        assert_eq!(
            spec.reduction_formula(),
            "SumReduction(Exp(-SqDist(x,y))*b,1)"
        );
    }

    #[test]
    fn reduction_formula_with_parameter() {
        let spec = gaussian().with_reduction(ReductionOp::KMin(4));
        assert_eq!(
            spec.reduction_formula(),
            "KMinReduction(Exp(-SqDist(x,y))*b,4,0)"
        );
    }

    #[test]
    fn flags_are_a_sorted_set() {
        let a = gaussian().with_flags(["-DUSE_HALF=0", "-O3", "-O3"]);
        let b = gaussian().with_flags([" -O3 ", "-DUSE_HALF=0", ""]);
        assert_eq!(a, b);
        assert_eq!(a.flags().collect::<Vec<_>>(), vec!["-DUSE_HALF=0", "-O3"]);
    }

    #[test]
    fn aliases_by_category() {
        let spec = gaussian();
        let j: Vec<_> = spec.aliases_of(Category::J).map(|a| a.name.as_str()).collect();
        assert_eq!(j, vec!["y", "b"]);
        assert_eq!(spec.aliases_of(Category::Param).count(), 0);
    }

    #[test]
    fn alias_signature_format() {
        assert_eq!(
            gaussian().alias_signature(),
            "x=Vi(0,3);y=Vj(1,3);b=Vj(2,1)"
        );
    }

    #[test]
    fn empty_formula_rejected() {
        let err = FormulaSpec::parse::<&str>("   ", &[], "Sum", "float32").unwrap_err();
        assert_eq!(err, FormulaError::EmptyFormula);
    }

    #[test]
    fn unbalanced_formula_rejected() {
        for formula in ["Exp(x", "x)*(y", "(x*y))"] {
            let err =
                FormulaSpec::parse(formula, &["x=Vi(0,1)", "y=Vj(1,1)"], "Sum", "float32")
                    .unwrap_err();
            assert!(
                matches!(err, FormulaError::UnbalancedParentheses(_)),
                "{formula}"
            );
        }
    }

    #[test]
    fn unknown_reduction_rejected() {
        let err = FormulaSpec::parse("x", &["x=Vi(0,1)"], "Average", "float32").unwrap_err();
        assert_eq!(err, FormulaError::UnknownReduction("Average".to_string()));
    }

    #[test]
    fn display_summarizes_spec() {
        let s = gaussian().to_string();
        assert!(s.starts_with("SumReduction("));
        assert!(s.contains("x=Vi(0,3)"));
        assert!(s.ends_with("(float32)"));
    }

    #[test]
    fn serde_roundtrip() {
        let spec = gaussian().with_flags(["-O3"]);
        let json = serde_json::to_string(&spec).unwrap();
        let back: FormulaSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}
