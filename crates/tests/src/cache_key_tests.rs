//! Cache keys depend only on the endpoint name and the canonical form of the arguments.

use crate::mock_infrastructure::{create_posts_api, create_test_config};
use serde_json::json;
use spectra_core::{
    cache::{build_cache_key, serialize_args},
    SubscriptionOptions,
};

#[test]
fn test_key_ignores_object_key_order() {
    let a = build_cache_key("search", &json!({ "page": 1, "filter": { "tag": "x", "sort": "asc" } }));
    let b = build_cache_key("search", &json!({ "filter": { "sort": "asc", "tag": "x" }, "page": 1 }));
    assert_eq!(a, b);
}

#[test]
fn test_key_distinguishes_values_and_endpoints() {
    let base = build_cache_key("search", &json!({ "page": 1 }));
    assert_ne!(base, build_cache_key("search", &json!({ "page": 2 })));
    assert_ne!(base, build_cache_key("search", &json!({ "page": "1" })));
    assert_ne!(base, build_cache_key("lookup", &json!({ "page": 1 })));
    assert_ne!(build_cache_key("search", &json!([1, 2])), build_cache_key("search", &json!([2, 1])));
}

#[test]
fn test_typed_arguments_serialize_like_json() {
    let typed = serialize_args(&(1, "x")).expect("serializes");
    assert_eq!(build_cache_key("pair", &typed), build_cache_key("pair", &json!([1, "x"])));
}

#[tokio::test(start_paused = true)]
async fn test_reordered_arguments_hit_the_same_entry() {
    let (api, backend) = create_posts_api(create_test_config()).expect("api");
    api.inject_endpoints(
        spectra_core::api::EndpointSet::new().query(
            "findPost",
            spectra_core::QueryEndpoint::new().query(|args| json!({ "path": format!("/posts/{}", args["id"]) })),
        ),
        false,
    )
    .expect("injects");

    let first = api
        .subscribe("findPost", &json!({ "id": 1, "fields": ["title"] }), SubscriptionOptions::default())
        .expect("subscribes");
    let second = api
        .subscribe("findPost", &json!({ "fields": ["title"], "id": 1 }), SubscriptionOptions::default())
        .expect("subscribes");
    api.settled().await;

    assert_eq!(first.key(), second.key());
    assert_eq!(backend.count("GET", "/posts/1"), 1);
}
