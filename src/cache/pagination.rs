//! Offset pagination on top of the query cache.

use std::future::Future;

use serde::{Deserialize, Serialize};

use super::query::QueryCache;

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_LIMIT: u32 = 10;

/// A 1-based page request. Zero page or limit is raised to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    page: u32,
    limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Number of rows to skip: `(page - 1) * limit`.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    /// Cache key for this page of `base`.
    pub fn cache_key(&self, base: &str) -> String {
        format!("{base}_page_{}_limit_{}", self.page, self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE, DEFAULT_LIMIT)
    }
}

/// One page of results with the page coordinates that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub limit: u32,
}

impl QueryCache {
    /// Fetch one page through the cache, using the configured page TTL.
    ///
    /// `fetch_page` receives `(offset, limit)`. No total count is carried;
    /// callers that need one fetch it separately.
    pub async fn paginated_query<T, E, F, Fut>(
        &self,
        key: &str,
        fetch_page: F,
        request: PageRequest,
    ) -> Result<Paginated<T>, E>
    where
        T: Serialize + Clone + Send + Sync + 'static,
        F: FnOnce(u64, u32) -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
    {
        let cache_key = request.cache_key(key);
        let offset = request.offset();
        let limit = request.limit();

        let data = self
            .cached_query(
                &cache_key,
                move || fetch_page(offset, limit),
                self.config().page_ttl(),
            )
            .await?;

        Ok(Paginated {
            data,
            page: request.page(),
            limit,
        })
    }
}
