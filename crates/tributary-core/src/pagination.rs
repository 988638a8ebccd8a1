//! Cursor-driven pagination protocol.
//!
//! Drives "list all items" against any paginated upstream listing until
//! exhaustion. Enumeration halts on an empty page even when a cursor was
//! returned, so a misbehaving collaborator cannot loop us forever. Cursors
//! are only valid within the enumeration that produced them; an error aborts
//! the enumeration and the caller restarts from scratch if it wants to.

use std::future::Future;

use crate::error::SourceError;

/// Opaque continuation token from an upstream listing call.
pub type Cursor = String;

/// One page of an upstream listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<Cursor>) -> Self {
        Self { items, next_cursor }
    }

    /// A terminal empty page.
    pub fn end() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }
}

/// Enumerate every page, handing each page's items to `on_page` in upstream
/// order. Returns the total number of items yielded.
pub async fn for_each_page<T, L, Fut, F>(mut list: L, mut on_page: F) -> Result<usize, SourceError>
where
    L: FnMut(Option<Cursor>) -> Fut,
    Fut: Future<Output = Result<Page<T>, SourceError>>,
    F: FnMut(Vec<T>),
{
    let mut cursor: Option<Cursor> = None;
    let mut total = 0usize;

    loop {
        let page = list(cursor.take()).await?;
        if page.items.is_empty() {
            return Ok(total);
        }
        total += page.items.len();
        let next = page.next_cursor;
        on_page(page.items);
        match next {
            Some(c) => cursor = Some(c),
            None => return Ok(total),
        }
    }
}

/// Collect a full enumeration into one vector.
pub async fn collect_all<T, L, Fut>(list: L) -> Result<Vec<T>, SourceError>
where
    L: FnMut(Option<Cursor>) -> Fut,
    Fut: Future<Output = Result<Page<T>, SourceError>>,
{
    let mut all = Vec::new();
    for_each_page(list, |items| all.extend(items)).await?;
    Ok(all)
}
