//! Block-sparse reduction ranges.
//!
//! A [`Ranges`] restricts which `(i, j)` pairs a kernel visits. It is made
//! of two symmetric halves. For the `i` half, `ranges_i[k]` is a half-open
//! block of rows and `slices_i[k]` is the end index, into `redranges_j`, of
//! the column blocks that row block interacts with (the start is
//! `slices_i[k - 1]`, or 0). The `j` half mirrors it for reductions along
//! the other axis.
//!
//! Ranges are threaded to the kernel unmodified. [`RangesArg`] keeps the
//! kernel signature fixed-arity whether or not a restriction is given.

use crate::error::DispatchError;

/// Half-open index interval `[start, end)`.
pub type Interval = [i64; 2];

/// A block-sparse restriction of the `(i, j)` plane.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ranges {
    /// Row blocks.
    pub ranges_i: Vec<Interval>,
    /// Per row block, end index into `redranges_j`.
    pub slices_i: Vec<i64>,
    /// Column blocks visited by the row blocks.
    pub redranges_j: Vec<Interval>,
    /// Column blocks.
    pub ranges_j: Vec<Interval>,
    /// Per column block, end index into `redranges_i`.
    pub slices_j: Vec<i64>,
    /// Row blocks visited by the column blocks.
    pub redranges_i: Vec<Interval>,
}

impl Ranges {
    /// Checks the structure against the extents of a call.
    pub fn validate(&self, nx: usize, ny: usize) -> Result<(), DispatchError> {
        check_half("i", &self.ranges_i, &self.slices_i, &self.redranges_j, nx, ny)?;
        check_half("j", &self.ranges_j, &self.slices_j, &self.redranges_i, ny, nx)
    }

    /// The six index arrays in kernel order, flattened.
    pub(crate) fn arrays(&self) -> [&[i64]; 6] {
        [
            self.ranges_i.as_flattened(),
            &self.slices_i,
            self.redranges_j.as_flattened(),
            self.ranges_j.as_flattened(),
            &self.slices_j,
            self.redranges_i.as_flattened(),
        ]
    }
}

fn check_half(
    axis: &str,
    ranges: &[Interval],
    slices: &[i64],
    redranges: &[Interval],
    extent: usize,
    red_extent: usize,
) -> Result<(), DispatchError> {
    let invalid = |msg: String| Err(DispatchError::InvalidRanges(msg));
    if ranges.len() != slices.len() {
        return invalid(format!(
            "{} ranges_{axis} but {} slices_{axis}",
            ranges.len(),
            slices.len()
        ));
    }
    for (k, range) in ranges.iter().enumerate() {
        check_interval(&format!("ranges_{axis}[{k}]"), *range, extent)?;
    }
    let other = if axis == "i" { "j" } else { "i" };
    for (k, range) in redranges.iter().enumerate() {
        check_interval(&format!("redranges_{other}[{k}]"), *range, red_extent)?;
    }
    let mut previous = 0;
    for (k, &end) in slices.iter().enumerate() {
        if end < previous {
            return invalid(format!("slices_{axis} decreases at index {k}"));
        }
        previous = end;
    }
    if previous as usize != redranges.len() {
        return invalid(format!(
            "slices_{axis} ends at {previous}, but there are {} redranges_{other}",
            redranges.len()
        ));
    }
    Ok(())
}

fn check_interval(name: &str, [start, end]: Interval, extent: usize) -> Result<(), DispatchError> {
    if start < 0 || start > end || end as usize > extent {
        return Err(DispatchError::InvalidRanges(format!(
            "{name} = [{start}, {end}) is not within [0, {extent})"
        )));
    }
    Ok(())
}

/// The ranges argument of a kernel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangesArg<'a> {
    /// Every `(i, j)` pair is visited.
    #[default]
    Unrestricted,
    /// Only the pairs described by the ranges are visited.
    Restricted(&'a Ranges),
}

impl<'a> From<Option<&'a Ranges>> for RangesArg<'a> {
    fn from(ranges: Option<&'a Ranges>) -> Self {
        match ranges {
            Some(ranges) => RangesArg::Restricted(ranges),
            None => RangesArg::Unrestricted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two row blocks and two column blocks; each interacts with one block.
    fn diagonal(n: i64) -> Ranges {
        let half = n / 2;
        Ranges {
            ranges_i: vec![[0, half], [half, n]],
            slices_i: vec![1, 2],
            redranges_j: vec![[0, half], [half, n]],
            ranges_j: vec![[0, half], [half, n]],
            slices_j: vec![1, 2],
            redranges_i: vec![[0, half], [half, n]],
        }
    }

    #[test]
    fn valid_ranges_pass() {
        assert!(diagonal(10).validate(10, 10).is_ok());
        assert!(Ranges::default().validate(0, 0).is_ok());
    }

    #[test]
    fn out_of_bounds_block_is_rejected() {
        let err = diagonal(10).validate(8, 10).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRanges(ref m) if m.contains("ranges_i[1]")));
    }

    #[test]
    fn slice_count_must_match() {
        let mut ranges = diagonal(10);
        ranges.slices_j.pop();
        let err = ranges.validate(10, 10).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRanges(ref m) if m.contains("slices_j")));
    }

    #[test]
    fn slices_must_cover_redranges() {
        let mut ranges = diagonal(10);
        ranges.slices_i = vec![1, 1];
        let err = ranges.validate(10, 10).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRanges(ref m) if m.contains("ends at 1")));
    }

    #[test]
    fn decreasing_slices_are_rejected() {
        let mut ranges = diagonal(10);
        ranges.slices_i = vec![2, 1];
        assert!(ranges.validate(10, 10).is_err());
    }

    #[test]
    fn arrays_are_flattened() {
        let ranges = diagonal(4);
        let arrays = ranges.arrays();
        assert_eq!(arrays[0], &[0, 2, 2, 4]);
        assert_eq!(arrays[1], &[1, 2]);
    }

    #[test]
    fn option_converts_to_arg() {
        let ranges = diagonal(4);
        assert_eq!(RangesArg::from(None), RangesArg::Unrestricted);
        assert_eq!(
            RangesArg::from(Some(&ranges)),
            RangesArg::Restricted(&ranges)
        );
    }
}
