//! Cursor pagination over `*/list` operations.
//!
//! A listing is a cursor loop: fetch without a cursor, follow each
//! `nextCursor`, stop at the first page without one. [`Paginator::stream`]
//! yields pages lazily; [`collect_all`] folds them into one list, or fails as
//! a whole when any page fails.
//!
//! Termination does not depend on the server. The loop stops with
//! [`Error::NonTerminating`] (wrapped in [`Error::Pagination`]) after
//! `max_pages` pages or when a cursor comes back a second time.

use std::collections::HashSet;
use std::future::Future;

use futures::{Stream, TryStreamExt, stream};
use mcpload_protocol::types::Cursor;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// One page of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items on this page, in server order
    pub items: Vec<T>,
    /// Cursor of the following page; `None` on the last page
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    /// A page with `items`, followed by `next_cursor`.
    pub fn new(items: Vec<T>, next_cursor: Option<Cursor>) -> Self {
        Self {
            items,
            next_cursor: next_cursor.filter(|c| !c.is_empty()),
        }
    }

    /// Whether another page follows.
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }
}

/// Drives the cursor loop of one listing.
#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    operation: &'static str,
    max_pages: usize,
}

struct Cursors<F> {
    fetch: F,
    next: Option<Cursor>,
    seen: HashSet<Cursor>,
    fetched: usize,
    done: bool,
}

impl Paginator {
    /// Paginate `operation` (`tools`, `resources`, `prompts`) over at most
    /// `max_pages` pages.
    pub fn new(operation: &'static str, max_pages: usize) -> Self {
        Self {
            operation,
            max_pages: max_pages.max(1),
        }
    }

    /// What is being listed.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    fn wrap(&self, source: Error) -> Error {
        Error::Pagination {
            operation: self.operation,
            source: Box::new(source),
        }
    }

    /// Lazily fetch pages with `fetch`, which receives the cursor to request.
    ///
    /// The stream ends after the last page, or after its first error.
    pub fn stream<T, F, Fut>(self, fetch: F) -> impl Stream<Item = Result<Page<T>>>
    where
        F: FnMut(Option<Cursor>) -> Fut,
        Fut: Future<Output = Result<Page<T>>>,
    {
        let start = Cursors {
            fetch,
            next: None,
            seen: HashSet::new(),
            fetched: 0,
            done: false,
        };

        stream::try_unfold(start, move |mut cursors| async move {
            if cursors.done {
                return Ok(None);
            }
            if cursors.fetched >= self.max_pages {
                debug!(operation = self.operation, max_pages = self.max_pages, "Page bound reached");
                return Err(self.wrap(Error::NonTerminating(format!(
                    "more than {} pages",
                    self.max_pages
                ))));
            }

            let page = (cursors.fetch)(cursors.next.take())
                .await
                .map_err(|e| self.wrap(e))?;
            cursors.fetched += 1;
            trace!(
                operation = self.operation,
                page = cursors.fetched,
                items = page.items.len(),
                "Fetched page"
            );

            match page.next_cursor.clone().filter(|c| !c.is_empty()) {
                None => cursors.done = true,
                Some(cursor) => {
                    if !cursors.seen.insert(cursor.clone()) {
                        return Err(self.wrap(Error::NonTerminating(format!(
                            "server repeated cursor `{cursor}`"
                        ))));
                    }
                    cursors.next = Some(cursor);
                }
            }

            Ok::<_, Error>(Some((page, cursors)))
        })
    }
}

/// Concatenate every page's items in order.
///
/// # Errors
///
/// The first page error; items gathered so far are discarded.
pub async fn collect_all<T, S>(pages: S) -> Result<Vec<T>>
where
    S: Stream<Item = Result<Page<T>>>,
{
    pages
        .try_fold(Vec::new(), |mut items, page| async move {
            items.extend(page.items);
            Ok(items)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pages(cursor: Option<Cursor>) -> Result<Page<u32>> {
        Ok(match cursor.as_deref() {
            None => Page::new(vec![1, 2], Some("b".to_string())),
            Some("b") => Page::new(vec![3], Some("c".to_string())),
            Some("c") => Page::new(vec![4, 5], Some(String::new())),
            Some(other) => panic!("unexpected cursor {other}"),
        })
    }

    #[tokio::test]
    async fn test_pages_concatenate_in_order() {
        let paginator = Paginator::new("tools", 10);
        let items = collect_all(paginator.stream(|cursor| async move { pages(cursor) }))
            .await
            .unwrap();
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let paginator = Paginator::new("tools", 10);

        let stream = paginator.stream(move |cursor| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { pages(cursor) }
        });
        let first: Vec<_> = stream.take(1).collect().await;

        assert_eq!(first.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_page_error_discards_everything() {
        let paginator = Paginator::new("resources", 10);
        let result = collect_all(paginator.stream(|cursor| async move {
            match cursor.as_deref() {
                Some("c") => Err(Error::Connection("boom".to_string())),
                _ => pages(cursor),
            }
        }))
        .await;

        let err = result.unwrap_err();
        assert!(
            matches!(&err, Error::Pagination { operation: "resources", source } if matches!(**source, Error::Connection(_))),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn test_repeated_cursor_terminates() {
        let paginator = Paginator::new("prompts", 1000);
        let result = collect_all(paginator.stream(|_| async {
            Ok(Page::new(vec![0u32], Some("again".to_string())))
        }))
        .await;

        let err = result.unwrap_err();
        assert!(
            matches!(&err, Error::Pagination { source, .. } if matches!(**source, Error::NonTerminating(_))),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn test_page_bound_terminates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let paginator = Paginator::new("tools", 5);

        let result = collect_all(paginator.stream(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(Page::new(vec![n], Some(format!("cursor-{n}")))) }
        }))
        .await;

        assert!(matches!(result, Err(Error::Pagination { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_stream_ends_after_error() {
        let paginator = Paginator::new("tools", 10);
        let stream = paginator.stream(|_| async {
            Err::<Page<u32>, _>(Error::Connection("down".to_string()))
        });
        let results: Vec<_> = stream.collect().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }
}
