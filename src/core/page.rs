//! Pagination envelope shared by every provider

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position in a paginated source resource
///
/// Sources paginate in different ways (offsets, opaque tokens, page numbers).
/// A cursor is opaque to the runner; only the pull strategy that produced it
/// interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cursor {
    /// Item offset (`startAt` style APIs)
    Offset { start_at: u64 },
    /// Opaque continuation token; `None` requests the first page
    Token { token: Option<String> },
    /// 1-based page number
    Page { page: u32 },
    /// Inner offset within the `outer`-th element of a parent resource
    Nested { outer: usize, inner: u64 },
}

impl Cursor {
    pub fn start() -> Self {
        Cursor::Offset { start_at: 0 }
    }

    pub fn first_token() -> Self {
        Cursor::Token { token: None }
    }

    pub fn nested_start() -> Self {
        Cursor::Nested { outer: 0, inner: 0 }
    }

    /// Offset value for offset cursors, 0 otherwise
    pub fn offset(&self) -> u64 {
        match self {
            Cursor::Offset { start_at } => *start_at,
            Cursor::Nested { inner, .. } => *inner,
            Cursor::Page { page } => u64::from(page.saturating_sub(1)),
            Cursor::Token { .. } => 0,
        }
    }

    /// Whether this cursor points at the very first page of the resource
    pub fn is_start(&self) -> bool {
        match self {
            Cursor::Offset { start_at } => *start_at == 0,
            Cursor::Token { token } => token.is_none(),
            Cursor::Page { page } => *page <= 1,
            Cursor::Nested { outer, inner } => *outer == 0 && *inner == 0,
        }
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Cursor::start()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Offset { start_at } => write!(f, "offset:{}", start_at),
            Cursor::Token { token: Some(t) } => write!(f, "token:{}", t),
            Cursor::Token { token: None } => write!(f, "token:<first>"),
            Cursor::Page { page } => write!(f, "page:{}", page),
            Cursor::Nested { outer, inner } => write!(f, "nested:{}/{}", outer, inner),
        }
    }
}

/// One page returned by a pull
#[derive(Debug, Clone, PartialEq)]
pub struct PullResult<T> {
    /// Items on this page
    pub items: Vec<T>,

    /// Whether another page should be requested
    pub has_more: bool,

    /// Cursor this page was fetched with
    pub cursor: Cursor,

    /// Cursor for the next page (required when `has_more`)
    pub next_cursor: Option<Cursor>,

    /// Page size that was requested
    pub max_results: u32,
}

impl<T> PullResult<T> {
    /// Offset-paginated page; the next cursor advances by the number of items received
    pub fn offset(items: Vec<T>, start_at: u64, max_results: u32, has_more: bool) -> Self {
        let next = start_at + items.len() as u64;
        Self {
            has_more,
            cursor: Cursor::Offset { start_at },
            next_cursor: has_more.then_some(Cursor::Offset { start_at: next }),
            max_results,
            items,
        }
    }

    /// Token-paginated page
    pub fn token(items: Vec<T>, cursor: Cursor, next_token: Option<String>, max_results: u32) -> Self {
        let has_more = next_token.is_some();
        Self {
            items,
            has_more,
            cursor,
            next_cursor: next_token.map(|t| Cursor::Token { token: Some(t) }),
            max_results,
        }
    }

    /// Resource that is not paginated at all
    pub fn single(items: Vec<T>) -> Self {
        let max_results = items.len() as u32;
        Self {
            items,
            has_more: false,
            cursor: Cursor::start(),
            next_cursor: None,
            max_results,
        }
    }

    pub fn empty(cursor: Cursor) -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
            cursor,
            next_cursor: None,
            max_results: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether the page honors the pagination contract
    ///
    /// A page that claims more data must say where it continues.
    pub fn is_well_formed(&self) -> bool {
        !self.has_more || self.next_cursor.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_page_advances_by_items_received() {
        let page = PullResult::offset(vec![1, 2, 3], 50, 50, true);
        assert_eq!(page.next_cursor, Some(Cursor::Offset { start_at: 53 }));
        assert!(page.is_well_formed());

        let last = PullResult::offset(vec![1], 53, 50, false);
        assert_eq!(last.next_cursor, None);
    }

    #[test]
    fn test_token_page_has_more_follows_token() {
        let page: PullResult<u8> = PullResult::token(vec![], Cursor::first_token(), Some("abc".into()), 50);
        assert!(page.has_more);
        assert_eq!(page.next_cursor, Some(Cursor::Token { token: Some("abc".into()) }));

        let last: PullResult<u8> = PullResult::token(vec![], Cursor::first_token(), None, 50);
        assert!(!last.has_more);
    }

    #[test]
    fn test_malformed_page_detected() {
        let page = PullResult {
            items: vec![1],
            has_more: true,
            cursor: Cursor::start(),
            next_cursor: None,
            max_results: 1,
        };
        assert!(!page.is_well_formed());
    }

    #[test]
    fn test_cursor_roundtrips_through_json() {
        let cursor = Cursor::Nested { outer: 2, inner: 100 };
        let json = serde_json::to_string(&cursor).unwrap();
        assert_eq!(serde_json::from_str::<Cursor>(&json).unwrap(), cursor);
        assert!(Cursor::first_token().is_start());
        assert!(!Cursor::Offset { start_at: 5 }.is_start());
    }
}
