//! Alias declarations binding formula variables to call arguments.
//!
//! An alias is written `name = Vi(pos, dim)`, `name = Vj(pos, dim)` or
//! `name = Pm(pos, dim)`. The short form `Vi(dim)` takes its position from
//! the declaration index. Whitespace anywhere in a declaration is ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::FormulaError;

/// Which index an aliased array is indexed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    /// Indexed by `i`, the outer ("x") axis. Declared with `Vi`.
    I,
    /// Indexed by `j`, the inner ("y") axis. Declared with `Vj`.
    J,
    /// A parameter with no axis. Declared with `Pm`.
    Param,
}

impl Category {
    /// The declaration keyword for this category.
    pub fn keyword(self) -> &'static str {
        match self {
            Category::I => "Vi",
            Category::J => "Vj",
            Category::Param => "Pm",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "Vi" => Some(Category::I),
            "Vj" => Some(Category::J),
            "Pm" => Some(Category::Param),
            _ => None,
        }
    }
}

/// A validated alias binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Alias {
    /// Variable name used in the formula.
    pub name: String,
    /// Axis the bound array is indexed by.
    pub category: Category,
    /// Index of the bound array in the call's argument list.
    pub position: usize,
    /// Number of scalars per indexed element (or total, for parameters).
    pub dim: usize,
}

impl Alias {
    /// Creates an alias, validating the name and dimension.
    pub fn new(
        name: &str,
        category: Category,
        position: usize,
        dim: usize,
    ) -> Result<Self, FormulaError> {
        let alias = Self {
            name: name.to_string(),
            category,
            position,
            dim,
        };
        if !is_identifier(name) {
            return Err(alias.invalid("name must be an identifier"));
        }
        if dim == 0 {
            return Err(alias.invalid("dimension must be at least 1"));
        }
        Ok(alias)
    }

    /// Parses a single declaration. `index` is the declaration's place in
    /// its list and supplies the position for the short `Vi(dim)` form.
    pub fn parse(decl: &str, index: usize) -> Result<Self, FormulaError> {
        let invalid = |reason: &str| FormulaError::InvalidAlias {
            decl: decl.to_string(),
            reason: reason.to_string(),
        };

        let compact: String = decl.chars().filter(|c| !c.is_whitespace()).collect();
        let (name, rhs) = compact
            .split_once('=')
            .ok_or_else(|| invalid("expected 'name = Vi(pos, dim)'"))?;

        let open = rhs.find('(').ok_or_else(|| invalid("missing '('"))?;
        let inner = rhs[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| invalid("missing closing ')'"))?;
        let keyword = &rhs[..open];
        let category = Category::from_keyword(keyword)
            .ok_or_else(|| invalid(&format!("unknown category '{keyword}'")))?;

        let numbers = inner
            .split(',')
            .map(|n| n.parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid("arguments must be non-negative integers"))?;
        let (position, dim) = match numbers.as_slice() {
            [dim] => (index, *dim),
            [position, dim] => (*position, *dim),
            _ => return Err(invalid("expected one or two arguments")),
        };

        Self::new(name, category, position, dim).map_err(|e| match e {
            FormulaError::InvalidAlias { reason, .. } => invalid(&reason),
            other => other,
        })
    }

    fn invalid(&self, reason: &str) -> FormulaError {
        FormulaError::InvalidAlias {
            decl: self.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}({},{})",
            self.name,
            self.category.keyword(),
            self.position,
            self.dim
        )
    }
}

/// Parses and validates a list of alias declarations.
///
/// Names and positions must be unique and positions must cover `0..n`. The
/// result is sorted by position, so lists that differ only in declaration
/// order produce identical output.
pub fn parse_aliases<S: AsRef<str>>(decls: &[S]) -> Result<Vec<Alias>, FormulaError> {
    let aliases = decls
        .iter()
        .enumerate()
        .map(|(index, decl)| Alias::parse(decl.as_ref(), index))
        .collect::<Result<Vec<_>, _>>()?;
    canonicalize(aliases)
}

/// Validates already-built aliases and sorts them by position.
pub fn canonicalize(mut aliases: Vec<Alias>) -> Result<Vec<Alias>, FormulaError> {
    let mut names = HashSet::with_capacity(aliases.len());
    for alias in &aliases {
        if !names.insert(alias.name.as_str()) {
            return Err(FormulaError::DuplicateAlias(alias.name.clone()));
        }
    }

    aliases.sort_by_key(|a| a.position);
    for pair in aliases.windows(2) {
        if pair[0].position == pair[1].position {
            return Err(FormulaError::DuplicatePosition(pair[0].position));
        }
    }
    for (expected, alias) in aliases.iter().enumerate() {
        if alias.position != expected {
            return Err(FormulaError::MissingPosition(expected));
        }
    }
    Ok(aliases)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
