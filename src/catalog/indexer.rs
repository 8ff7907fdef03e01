//! Positional and slice indexers for catalogs

use std::fmt;
use std::ops::{Range, RangeFrom, RangeFull, RangeTo};
use std::str::FromStr;

use crate::error::{CatalogError, Result};

/// Argument accepted by the `*_index` accessors of a catalog
///
/// Only single positions and half-open slices without a step exist. Values
/// coming from untyped input (text, signed integers) are converted through
/// [`FromStr`] / [`TryFrom`], which reject anything else with
/// [`CatalogError::InvalidIndexer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indexer {
    Position(usize),
    /// `[start, stop)`; `stop == None` runs to the end of the listing
    Slice { start: usize, stop: Option<usize> },
}

impl Indexer {
    pub fn slice(start: usize, stop: Option<usize>) -> Self {
        Indexer::Slice { start, stop }
    }
}

impl From<usize> for Indexer {
    fn from(index: usize) -> Self {
        Indexer::Position(index)
    }
}

impl From<Range<usize>> for Indexer {
    fn from(range: Range<usize>) -> Self {
        Indexer::slice(range.start, Some(range.end))
    }
}

impl From<RangeFrom<usize>> for Indexer {
    fn from(range: RangeFrom<usize>) -> Self {
        Indexer::slice(range.start, None)
    }
}

impl From<RangeTo<usize>> for Indexer {
    fn from(range: RangeTo<usize>) -> Self {
        Indexer::slice(0, Some(range.end))
    }
}

impl From<RangeFull> for Indexer {
    fn from(_: RangeFull) -> Self {
        Indexer::slice(0, None)
    }
}

impl TryFrom<i64> for Indexer {
    type Error = CatalogError;

    fn try_from(index: i64) -> Result<Self> {
        usize::try_from(index)
            .map(Indexer::Position)
            .map_err(|_| CatalogError::InvalidIndexer(format!("negative index {}", index)))
    }
}

impl FromStr for Indexer {
    type Err = CatalogError;

    /// Parse `"3"`, `"1:4"`, `"2:"`, `":4"` or `":"`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [index] => parse_bound(index, s).map(Indexer::Position),
            [start, stop] => {
                let start = if start.trim().is_empty() {
                    0
                } else {
                    parse_bound(start, s)?
                };
                let stop = if stop.trim().is_empty() {
                    None
                } else {
                    Some(parse_bound(stop, s)?)
                };
                Ok(Indexer::Slice { start, stop })
            }
            _ => Err(CatalogError::InvalidIndexer(format!(
                "'{}': only integer positions and step-less slices are supported",
                s
            ))),
        }
    }
}

fn parse_bound(value: &str, whole: &str) -> Result<usize> {
    value.trim().parse::<usize>().map_err(|_| {
        CatalogError::InvalidIndexer(format!(
            "'{}' is neither a non-negative integer nor a slice",
            whole
        ))
    })
}

impl fmt::Display for Indexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Indexer::Position(index) => write!(f, "{}", index),
            Indexer::Slice { start, stop: None } => write!(f, "{}:", start),
            Indexer::Slice {
                start,
                stop: Some(stop),
            } => write!(f, "{}:{}", start, stop),
        }
    }
}

/// Result of an indexer: one entry for a position, a list for a slice
#[derive(Debug, Clone, PartialEq)]
pub enum Selection<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Selection<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Selection::One(item) => vec![item],
            Selection::Many(items) => items,
        }
    }

    pub fn one(self) -> Option<T> {
        match self {
            Selection::One(item) => Some(item),
            Selection::Many(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_position_and_slices() {
        assert_eq!("3".parse::<Indexer>().unwrap(), Indexer::Position(3));
        assert_eq!("1:4".parse::<Indexer>().unwrap(), Indexer::slice(1, Some(4)));
        assert_eq!("2:".parse::<Indexer>().unwrap(), Indexer::slice(2, None));
        assert_eq!(":4".parse::<Indexer>().unwrap(), Indexer::slice(0, Some(4)));
        assert_eq!(":".parse::<Indexer>().unwrap(), Indexer::slice(0, None));
    }

    #[test]
    fn test_parse_rejects_other_kinds() {
        for input in ["abc", "1.5", "-1", "0:4:2", "", "x:3"] {
            assert!(
                matches!(input.parse::<Indexer>(), Err(CatalogError::InvalidIndexer(_))),
                "{} should be rejected",
                input
            );
        }
    }

    #[test]
    fn test_ranges_convert() {
        assert_eq!(Indexer::from(2usize..5), Indexer::slice(2, Some(5)));
        assert_eq!(Indexer::from(2usize..), Indexer::slice(2, None));
        assert_eq!(Indexer::from(..5usize), Indexer::slice(0, Some(5)));
        assert_eq!(Indexer::from(..), Indexer::slice(0, None));
    }

    #[test]
    fn test_signed_conversion() {
        assert_eq!(Indexer::try_from(4i64).unwrap(), Indexer::Position(4));
        assert!(Indexer::try_from(-1i64).is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for indexer in [Indexer::Position(7), Indexer::slice(1, None), Indexer::slice(0, Some(3))] {
            assert_eq!(indexer.to_string().parse::<Indexer>().unwrap(), indexer);
        }
    }

    #[test]
    fn test_selection() {
        assert_eq!(Selection::One(1).into_vec(), vec![1]);
        assert_eq!(Selection::Many(vec![1, 2]).into_vec(), vec![1, 2]);
        assert_eq!(Selection::<i32>::Many(vec![]).one(), None);
    }
}
