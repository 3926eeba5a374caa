//! Pagination model.
//!
//! Turns a flat list of page locators into the ordered [`Spread`]s a book is made of:
//! a front cover showing only its right slot, interior spreads pairing consecutive pages,
//! and a back cover showing only its left slot.
//!
//! ```
//! use flipbook_engine::pagination::build_spreads;
//!
//! let spreads = build_spreads(&["a", "b", "c", "d"]);
//! assert_eq!(spreads.len(), 3);
//! assert!(spreads[0].is_front_cover);
//! assert_eq!(spreads[1].left_locator.as_deref(), Some("b"));
//! assert!(spreads[2].is_back_cover);
//! ```

use serde::{Deserialize, Serialize};

/// One displayed unit of the book.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Spread {
    pub left_locator: Option<String>,
    pub right_locator: Option<String>,
    /// Media index shown in the left slot
    pub left_page: Option<usize>,
    /// Media index shown in the right slot
    pub right_page: Option<usize>,
    pub is_front_cover: bool,
    pub is_back_cover: bool,
}

impl Spread {
    /// The first media index visible in this spread.
    pub fn first_page(&self) -> Option<usize> {
        self.left_page.or(self.right_page)
    }

    pub fn contains(&self, page: usize) -> bool {
        self.left_page == Some(page) || self.right_page == Some(page)
    }

    fn front_cover(locator: &str) -> Self {
        Self {
            right_locator: Some(locator.to_string()),
            right_page: Some(0),
            is_front_cover: true,
            ..Default::default()
        }
    }

    fn back_cover(index: usize, locator: &str) -> Self {
        Self {
            left_locator: Some(locator.to_string()),
            left_page: Some(index),
            is_back_cover: true,
            ..Default::default()
        }
    }
}

/// Derived position information. Recomputed on every committed navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageInfo {
    pub index: usize,
    pub total: usize,
    pub spread_index: usize,
    pub total_spreads: usize,
}

/// Builds the spread sequence for the given locators.
///
/// Deterministic and side-effect free; safe to call again whenever the media list changes.
pub fn build_spreads<S: AsRef<str>>(locators: &[S]) -> Vec<Spread> {
    let len = locators.len();
    match len {
        0 => Vec::new(),
        1 => vec![Spread::front_cover(locators[0].as_ref())],
        _ => {
            let mut spreads = Vec::with_capacity(expected_spread_count(len));
            spreads.push(Spread::front_cover(locators[0].as_ref()));

            // Interior pages are 1..=len-2
            let mut i = 1;
            while i < len - 1 {
                if i + 1 < len - 1 {
                    spreads.push(Spread {
                        left_locator: Some(locators[i].as_ref().to_string()),
                        right_locator: Some(locators[i + 1].as_ref().to_string()),
                        left_page: Some(i),
                        right_page: Some(i + 1),
                        ..Default::default()
                    });
                    i += 2;
                } else {
                    // Unpaired trailing page goes alone in the right slot
                    spreads.push(Spread {
                        right_locator: Some(locators[i].as_ref().to_string()),
                        right_page: Some(i),
                        ..Default::default()
                    });
                    i += 1;
                }
            }

            spreads.push(Spread::back_cover(len - 1, locators[len - 1].as_ref()));
            spreads
        }
    }
}

/// Number of spreads [`build_spreads`] produces for `len` pages.
pub fn expected_spread_count(len: usize) -> usize {
    match len {
        0 | 1 => len,
        _ => (len - 2).div_ceil(2) + 2,
    }
}

/// Maps a page index onto a spread index by integer halving, as direct jumps do.
pub fn spread_for_page(page: usize) -> usize {
    page / 2
}

/// Position info for a spread-addressed engine sitting on `spread_index`.
pub fn spread_page_info(spreads: &[Spread], spread_index: usize, total: usize) -> PageInfo {
    let index = spreads
        .get(spread_index)
        .and_then(Spread::first_page)
        .unwrap_or(0);

    PageInfo {
        index,
        total,
        spread_index,
        total_spreads: spreads.len(),
    }
}

/// Index of the spread showing `page`, if any.
pub fn spread_containing(spreads: &[Spread], page: usize) -> Option<usize> {
    spreads.iter().position(|s| s.contains(page))
}

/// Position info for a page-addressed engine sitting on `page`. The spread is the one that
/// shows `page`, so both backends agree on it.
pub fn single_page_info(spreads: &[Spread], page: usize, total: usize) -> PageInfo {
    let spread_index = spread_containing(spreads, page)
        .unwrap_or_else(|| spreads.len().saturating_sub(1));
    PageInfo {
        index: page,
        total,
        spread_index,
        total_spreads: spreads.len(),
    }
}
