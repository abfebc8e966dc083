//! Request routing

use super::store::StreamRegistry;
use super::stream::{FeedId, StreamId};
use crate::protocol::{Method, Request};

/// What a parsed request resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Render the status page
    Status,
    /// Answer 404
    NotFound,
    /// Upload into an idle feed
    Ingest(FeedId),
    /// Stream a definition
    Play(StreamId),
}

impl StreamRegistry {
    /// Resolve a request.
    ///
    /// A POST is only accepted on a feed's own path while no writer is
    /// attached; everything else that is not a GET on a known path is a 404.
    pub fn route(&self, request: &Request) -> Route {
        let Some(id) = self.lookup(&request.path) else {
            return Route::NotFound;
        };
        let def = self.definition(id);

        match request.method {
            Method::Get if def.is_status() => Route::Status,
            Method::Get => Route::Play(id),
            Method::Post => match self.ingest_target(id) {
                Some(feed) if !self.feed(feed).has_writer() => Route::Ingest(feed),
                Some(feed) => {
                    tracing::warn!(feed = %self.feed(feed).path, "Upload rejected: feed already has a writer");
                    Route::NotFound
                }
                None => Route::NotFound,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ContainerFormat;
    use crate::registry::StreamDefinition;

    fn registry() -> (StreamRegistry, FeedId) {
        let mut registry = StreamRegistry::new();
        registry.register_status("status.html").unwrap();
        let feed = registry
            .register_feed("feed1.ffm", "/tmp/never-opened.ffm", 1 << 20)
            .unwrap();
        registry
            .register(StreamDefinition::from_feed("live.flv", feed, ContainerFormat::Flv, vec![]))
            .unwrap();
        (registry, feed)
    }

    fn req(line: &str) -> Request {
        Request::parse(line.as_bytes()).unwrap()
    }

    #[test]
    fn test_routes() {
        let (registry, feed) = registry();
        assert_eq!(registry.route(&req("GET /status.html HTTP/1.0\n\n")), Route::Status);
        assert_eq!(registry.route(&req("GET /missing.ext HTTP/1.0\n\n")), Route::NotFound);
        assert_eq!(registry.route(&req("POST /feed1.ffm HTTP/1.0\n\n")), Route::Ingest(feed));
        assert_eq!(
            registry.route(&req("GET /live.flv HTTP/1.0\n\n")),
            Route::Play(registry.lookup("live.flv").unwrap())
        );
    }

    #[test]
    fn test_post_to_non_feed_is_not_found() {
        let (registry, _) = registry();
        assert_eq!(registry.route(&req("POST /live.flv HTTP/1.0\n\n")), Route::NotFound);
        assert_eq!(registry.route(&req("POST /status.html HTTP/1.0\n\n")), Route::NotFound);
    }

    #[test]
    fn test_post_to_busy_feed_is_not_found() {
        let (mut registry, feed) = registry();
        assert!(registry.feed_mut(feed).claim_writer());
        assert_eq!(registry.route(&req("POST /feed1.ffm HTTP/1.0\n\n")), Route::NotFound);
    }
}
