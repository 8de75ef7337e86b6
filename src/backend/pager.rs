//! Cursor pagination over a backend listing.
//!
//! [`UserPager`] turns the cursor-paged [`IdentityBackend::list_page`] call
//! into a lazy, deduplicated sequence of users. Pages are only fetched when
//! the buffered users run out, and a pager can be walked exactly once.

use std::collections::{HashSet, VecDeque};
use tracing::{debug, trace, warn};

use crate::error::BackendError;

use super::port::{BackendResult, IdentityBackend};
use super::types::ObservedUser;

/// Lazy walker over every user in a pool.
pub struct UserPager<'a, B: IdentityBackend + ?Sized> {
    /// Backend being listed.
    backend: &'a B,
    /// Token for the next page to request; `None` before the first page.
    next_token: Option<String>,
    /// Tokens already requested, for cycle detection.
    requested: HashSet<String>,
    /// Usernames already yielded.
    seen: HashSet<String>,
    /// Users fetched but not yet yielded.
    buffer: VecDeque<ObservedUser>,
    /// Number of pages fetched so far.
    pages: usize,
    /// Number of duplicate records dropped.
    duplicates: usize,
    /// Whether the final page has been fetched.
    exhausted: bool,
}

impl<'a, B: IdentityBackend + ?Sized> UserPager<'a, B> {
    /// Creates a pager positioned before the first page.
    #[must_use]
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            next_token: None,
            requested: HashSet::new(),
            seen: HashSet::new(),
            buffer: VecDeque::new(),
            pages: 0,
            duplicates: 0,
            exhausted: false,
        }
    }

    /// Returns the next user, fetching further pages as needed.
    ///
    /// Returns `Ok(None)` once the listing is complete.
    ///
    /// # Errors
    ///
    /// Returns the backend error of a failed page request, or `Unknown` if the
    /// backend hands out a continuation token it already handed out.
    pub async fn next(&mut self) -> BackendResult<Option<ObservedUser>> {
        loop {
            while let Some(user) = self.buffer.pop_front() {
                if self.seen.insert(user.username.clone()) {
                    return Ok(Some(user));
                }
                self.duplicates += 1;
                trace!("Dropping duplicate listing entry for {}", user.username);
            }

            if self.exhausted {
                return Ok(None);
            }

            self.fetch_page().await?;
        }
    }

    /// Walks the remaining listing and returns every user.
    ///
    /// # Errors
    ///
    /// Returns the first page request error.
    pub async fn collect_all(mut self) -> BackendResult<Vec<ObservedUser>> {
        let mut users = Vec::new();
        while let Some(user) = self.next().await? {
            users.push(user);
        }
        debug!(
            "Listed {} users across {} pages ({} duplicates dropped)",
            users.len(),
            self.pages,
            self.duplicates
        );
        Ok(users)
    }

    /// Returns the number of pages fetched so far.
    #[must_use]
    pub const fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Returns the number of duplicate records dropped so far.
    #[must_use]
    pub const fn duplicates_dropped(&self) -> usize {
        self.duplicates
    }

    /// Fetches the next page into the buffer.
    async fn fetch_page(&mut self) -> BackendResult<()> {
        let token = self.next_token.take();
        if let Some(t) = &token
            && !self.requested.insert(t.clone())
        {
            warn!("Backend {} repeated continuation token", self.backend.backend_type());
            return Err(BackendError::unknown(format!(
                "pagination token {t} was returned twice"
            )));
        }

        let page = self.backend.list_page(token).await?;
        self.pages += 1;
        trace!("Fetched page {} with {} users", self.pages, page.users.len());

        self.next_token = page.continuation().map(String::from);
        self.exhausted = self.next_token.is_none();
        self.buffer.extend(page.users);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::backend::port::MockIdentityBackend;
    use crate::backend::types::{DesiredUser, UserPage};

    async fn seeded_backend(count: usize, page_size: usize) -> MemoryBackend {
        let backend = MemoryBackend::new().with_page_size(page_size);
        for i in 0..count {
            let user = DesiredUser::new(format!("user-{i:03}"), format!("u{i}@example.com"), true);
            backend.create_user(&user).await.expect("seed user");
        }
        backend
    }

    fn observed(name: &str) -> ObservedUser {
        ObservedUser {
            username: name.to_string(),
            email: String::new(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_walks_every_page() {
        for page_size in [1, 3, 7, 25, 100] {
            let backend = seeded_backend(25, page_size).await;
            let mut pager = UserPager::new(&backend);
            let mut names = Vec::new();
            while let Some(user) = pager.next().await.expect("listing") {
                names.push(user.username);
            }

            assert_eq!(names.len(), 25, "page size {page_size}");
            assert_eq!(pager.pages_fetched(), 25_usize.div_ceil(page_size).max(1));
            let unique: HashSet<_> = names.iter().collect();
            assert_eq!(unique.len(), 25);
        }
    }

    #[tokio::test]
    async fn test_overlapping_pages_are_deduplicated() {
        let backend = seeded_backend(10, 3).await.with_overlapping_pages(true);
        let pager = UserPager::new(&backend);
        let users = pager.collect_all().await.expect("listing");

        assert_eq!(users.len(), 10);
        let unique: HashSet<_> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(unique.len(), 10);
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let backend = MemoryBackend::new();
        let users = UserPager::new(&backend).collect_all().await.expect("listing");
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn test_empty_token_ends_listing() {
        let mut mock = MockIdentityBackend::new();
        mock.expect_list_page()
            .times(1)
            .returning(|_| Ok(UserPage::new(vec![observed("a")], Some(String::new()))));

        let users = UserPager::new(&mock).collect_all().await.expect("listing");
        assert_eq!(users.len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_token_is_an_error() {
        let mut mock = MockIdentityBackend::new();
        mock.expect_backend_type().return_const("mock");
        mock.expect_list_page()
            .returning(|_| Ok(UserPage::new(vec![observed("a")], Some(String::from("t1")))));

        let result = UserPager::new(&mock).collect_all().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_page_error_propagates() {
        let mut mock = MockIdentityBackend::new();
        mock.expect_list_page()
            .returning(|_| Err(BackendError::unavailable("throttled")));

        let mut pager = UserPager::new(&mock);
        let err = pager.next().await.expect_err("should fail");
        assert_eq!(err.kind, crate::error::ErrorKind::Unavailable);
    }
}
