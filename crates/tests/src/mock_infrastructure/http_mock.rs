//! Mockito wrapper for exercising the HTTP base query end to end.

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::Value;

pub struct HttpMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl HttpMockBuilder {
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Answers `GET path` with `status` and a JSON body, `hits` times.
    pub async fn mock_get(&mut self, path: &str, status: usize, body: &Value, hits: usize) -> &mut Self {
        let mock = self
            .server
            .mock("GET", path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .expect(hits)
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Answers `method path` whose JSON body equals `request_body`.
    pub async fn mock_json(
        &mut self,
        method: &str,
        path: &str,
        request_body: &Value,
        status: usize,
        body: &Value,
    ) -> &mut Self {
        let mock = self
            .server
            .mock(method, path)
            .match_body(Matcher::Json(request_body.clone()))
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Asserts every registered mock was hit the expected number of times.
    pub async fn assert_all(&self) {
        for mock in &self.mocks {
            mock.assert_async().await;
        }
    }
}
