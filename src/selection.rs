//! Page selection: which pages of a document get transcribed.
//!
//! A [`PageSelection`] is parsed once from user input and expanded against
//! the real page count with [`PageSelection::select`]. Expansion always yields
//! a strictly ascending, deduplicated list of 1-indexed page numbers, or a
//! [`SelectionError`] before any page work is scheduled.
//!
//! Accepted expression forms:
//!
//! | Input        | Meaning                                 |
//! |--------------|-----------------------------------------|
//! | `""`, `all`  | every page                              |
//! | `5`          | page 5                                  |
//! | `1-3,7`      | pages 1, 2, 3 and 7                     |
//! | `2-4,3-6`    | overlaps merge: 2..=6                   |
//!
//! "First N pages" is not an expression form (a bare integer already means a
//! single page); it is the typed variant [`PageSelection::First`].

use crate::error::SelectionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One comma-separated token of a selection expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageToken {
    Single(usize),
    /// Inclusive range `start-end`.
    Range(usize, usize),
}

/// Specifies which pages of the PDF to transcribe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Transcribe every page (default).
    #[default]
    All,
    /// The first N pages, clipped to the document length.
    First(usize),
    /// Explicit pages and inclusive ranges.
    List(Vec<PageToken>),
}

impl PageSelection {
    /// Parse a selection expression (see module docs).
    ///
    /// Only syntax is checked here; bounds need the page count and are
    /// checked by [`select`](Self::select).
    pub fn parse(expr: &str) -> Result<Self, SelectionError> {
        let expr = expr.trim();
        if expr.is_empty() || expr.eq_ignore_ascii_case("all") {
            return Ok(PageSelection::All);
        }

        let tokens = expr
            .split(',')
            .map(|raw| parse_token(raw.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PageSelection::List(tokens))
    }

    /// Expand the selection into ascending, deduplicated 1-indexed page numbers.
    ///
    /// # Errors
    /// [`SelectionError`] when a page lies outside `1..=total`, a range is
    /// reversed, or `First(0)` is requested.
    pub fn select(&self, total: usize) -> Result<Vec<usize>, SelectionError> {
        match self {
            PageSelection::All => Ok((1..=total).collect()),
            PageSelection::First(0) => Err(SelectionError::EmptyFirst),
            PageSelection::First(n) => Ok((1..=(*n).min(total)).collect()),
            PageSelection::List(tokens) => {
                let mut pages = Vec::new();
                for token in tokens {
                    match *token {
                        PageToken::Single(p) => {
                            check_bounds(p, total)?;
                            pages.push(p);
                        }
                        PageToken::Range(start, end) => {
                            if start > end {
                                return Err(SelectionError::ReversedRange { start, end });
                            }
                            check_bounds(start, total)?;
                            check_bounds(end, total)?;
                            pages.extend(start..=end);
                        }
                    }
                }
                pages.sort_unstable();
                pages.dedup();
                Ok(pages)
            }
        }
    }
}

impl FromStr for PageSelection {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A plain count selects the first `n` pages.
impl From<usize> for PageSelection {
    fn from(n: usize) -> Self {
        PageSelection::First(n)
    }
}

impl fmt::Display for PageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageSelection::All => f.write_str("all"),
            PageSelection::First(n) => write!(f, "first {n}"),
            PageSelection::List(tokens) => {
                for (i, t) in tokens.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    match t {
                        PageToken::Single(p) => write!(f, "{p}")?,
                        PageToken::Range(a, b) => write!(f, "{a}-{b}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// Parse `expr` and expand it against `total` pages in one step.
pub fn select_pages(expr: &str, total: usize) -> Result<Vec<usize>, SelectionError> {
    PageSelection::parse(expr)?.select(total)
}

fn parse_token(raw: &str) -> Result<PageToken, SelectionError> {
    let invalid = || SelectionError::InvalidToken {
        token: raw.to_string(),
    };

    if let Some((start, end)) = raw.split_once('-') {
        let start = parse_page(start.trim()).ok_or_else(invalid)?;
        let end = parse_page(end.trim()).ok_or_else(invalid)?;
        return Ok(PageToken::Range(start, end));
    }
    parse_page(raw).map(PageToken::Single).ok_or_else(invalid)
}

fn parse_page(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn check_bounds(page: usize, total: usize) -> Result<(), SelectionError> {
    if page == 0 || page > total {
        Err(SelectionError::OutOfRange { page, total })
    } else {
        Ok(())
    }
}
