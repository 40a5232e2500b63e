//! Cursor pagination exposed as a lazy stream.

use directory_core::error::AppError;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::future::Future;

/// One server page.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_page_token: Option<String>) -> Self {
        Self {
            items,
            next_page_token,
        }
    }

    /// Single-shot result with no cursor.
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Drive `fetch` page by page. Nothing is requested until the stream is
/// polled, the caller may stop early by dropping it, and no request follows a
/// page without a next-page token.
pub fn paginate<'a, T, F, Fut>(fetch: F) -> BoxStream<'a, Result<T, AppError>>
where
    T: Send + 'a,
    F: FnMut(Option<String>) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Page<T>, AppError>> + Send + 'a,
{
    stream::try_unfold((fetch, Cursor::Start), |(mut fetch, cursor)| async move {
        let token = match cursor {
            Cursor::Done => return Ok::<_, AppError>(None),
            Cursor::Start => None,
            Cursor::Next(token) => Some(token),
        };
        let page = fetch(token).await?;
        let next = match page.next_page_token.filter(|t| !t.is_empty()) {
            Some(token) => Cursor::Next(token),
            None => Cursor::Done,
        };
        let items = stream::iter(page.items.into_iter().map(Ok::<T, AppError>));
        Ok::<_, AppError>(Some((items, (fetch, next))))
    })
    .try_flatten()
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type Counted = (Arc<AtomicUsize>, BoxStream<'static, Result<usize, AppError>>);

    fn pages(total: usize, page_size: usize) -> Counted {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let stream = paginate(move |token: Option<String>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let start: usize = token.map(|t| t.parse().unwrap()).unwrap_or(0);
                let end = (start + page_size).min(total);
                let next = (end < total).then(|| end.to_string());
                Ok(Page::new((start..end).collect(), next))
            }
        });
        (calls, stream)
    }

    #[tokio::test]
    async fn test_yields_every_item_once() {
        let (calls, stream) = pages(25, 10);
        let items: Vec<usize> = stream.try_collect().await.unwrap();
        assert_eq!(items, (0..25).collect::<Vec<_>>());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exact_page_size_needs_no_extra_request() {
        let (calls, stream) = pages(10, 10);
        let items: Vec<usize> = stream.try_collect().await.unwrap();
        assert_eq!(items.len(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let (_, stream) = pages(0, 10);
        let items: Vec<usize> = stream.try_collect().await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_lazy_and_stoppable() {
        let (calls, stream) = pages(100, 10);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let first: Vec<usize> = stream.take(5).try_collect().await.unwrap();
        assert_eq!(first, vec![0, 1, 2, 3, 4]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_ends_stream() {
        let stream = paginate(|_token: Option<String>| async {
            Err::<Page<u8>, _>(AppError::from_status(403, "denied"))
        });
        let result: Result<Vec<u8>, _> = stream.try_collect().await;
        assert_eq!(result.unwrap_err().kind(), directory_core::ErrorKind::PermissionDenied);
    }
}
