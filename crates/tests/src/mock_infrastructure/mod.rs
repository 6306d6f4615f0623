//! Mock infrastructure for exercising the query cache.
//!
//! ## Components
//!
//! - `InMemoryBackend`: a posts REST backend implementing `BaseQuery`, with failure injection
//!   and request gating
//! - `HttpMockBuilder`: wraps mockito for end-to-end runs through `HttpBaseQuery`
//! - Test helpers for the shared posts endpoints
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::{create_posts_api, create_test_config};
//!
//! let (api, backend) = create_posts_api(create_test_config())?;
//! let sub = api.subscribe("getPost", &1, Default::default())?;
//! ```

pub mod backend;
pub mod http_mock;
pub mod test_helpers;

pub use backend::{InMemoryBackend, RecordedRequest};
pub use http_mock::HttpMockBuilder;
pub use test_helpers::*;
