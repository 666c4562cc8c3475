//! Pluggable endpoint discovery.
//!
//! Discovery runs once during construction and only produces URLs; dialing
//! is the reconnect loop's job. Implement [`Discovery`] to source endpoints
//! from anywhere else (service registries, config services, gossip).

use async_trait::async_trait;

use super::errors::Error;

/// A source of endpoint URLs, consulted once at pool construction.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Produce the endpoint URLs to seed the registry with.
    ///
    /// # Errors
    ///
    /// Any error aborts pool construction.
    async fn discover(&self) -> Result<Vec<String>, Error>;
}

/// A fixed list of endpoint URLs.
#[derive(Debug, Clone)]
pub struct StaticEndpoints {
    urls: Vec<String>,
}

impl StaticEndpoints {
    /// Creates a static discovery source from the given URLs.
    #[must_use]
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { urls: urls.into_iter().map(Into::into).collect() }
    }
}

#[async_trait]
impl Discovery for StaticEndpoints {
    async fn discover(&self) -> Result<Vec<String>, Error> {
        info!(urls = ?self.urls, "endpoints from static list");
        Ok(self.urls.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_list_returns_urls_verbatim() {
        let discovery = StaticEndpoints::new(["ws://a:8546", "ws://b:8546"]);
        let urls = discovery.discover().await.unwrap();
        assert_eq!(urls, vec!["ws://a:8546".to_owned(), "ws://b:8546".to_owned()]);
    }
}
