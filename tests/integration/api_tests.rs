//! HTTP API tests: tile retrieval, geometry, blobs and error mapping.

use axum::http::StatusCode;
use serde_json::json;

use pageforest_tiles::storage::BlobStore;
use pageforest_tiles::tile::{is_png, RetryPolicy};
use pageforest_tiles::RouterConfig;

use super::test_utils::{
    get, memory_router, png_dimensions, unreliable_router, UnreliableStore, TEST_DOC,
    TEST_TILE_SIZE,
};

// =============================================================================
// Health and Stats
// =============================================================================

#[tokio::test]
async fn test_health() {
    let (router, _, _, _) = memory_router(RouterConfig::default());

    let response = get(&router, "/health").await;

    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_stats_counts_renders() {
    let (router, _, _, _) = memory_router(RouterConfig::default());

    get(&router, "/tiles/01.png").await;
    get(&router, "/tiles/01.png").await;
    get(&router, "/tiles/02.png").await;

    let stats = get(&router, "/stats").await.json();
    assert_eq!(stats["entries"], 2);
    assert_eq!(stats["renders"], 2);
    assert_eq!(stats["uploads"], 2);
}

// =============================================================================
// Tiles
// =============================================================================

#[tokio::test]
async fn test_tile_renders_on_miss() {
    let (router, _, store, renderer) = memory_router(RouterConfig::default());

    let response = get(&router, "/tiles/0.png").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some("image/png"));
    assert_eq!(response.header("x-tile-id"), Some("0.png"));
    assert_eq!(response.header("x-tile-cache-hit"), Some("false"));
    assert!(response
        .header("cache-control")
        .is_some_and(|v| v.contains("max-age=3600")));
    assert!(is_png(&response.body));
    assert_eq!(
        png_dimensions(&response.body),
        (TEST_TILE_SIZE, TEST_TILE_SIZE)
    );

    assert_eq!(renderer.calls(), 1);
    assert_eq!(
        store.get_blob(TEST_DOC, "0.png").await.unwrap(),
        response.body
    );
}

#[tokio::test]
async fn test_second_request_is_cache_hit() {
    let (router, _, _, renderer) = memory_router(RouterConfig::default());

    let first = get(&router, "/tiles/0123.png").await;
    let second = get(&router, "/tiles/0123.png").await;

    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.header("x-tile-cache-hit"), Some("true"));
    assert_eq!(first.body, second.body);
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn test_tile_by_coordinate() {
    let (router, _, _, _) = memory_router(RouterConfig::default());

    let with_ext = get(&router, "/tiles/2/3/3.png").await;
    assert_eq!(with_ext.status, StatusCode::OK);
    assert_eq!(with_ext.header("x-tile-id"), Some("033.png"));

    let without_ext = get(&router, "/tiles/2/0/0").await;
    assert_eq!(without_ext.status, StatusCode::OK);
    assert_eq!(without_ext.header("x-tile-id"), Some("000.png"));
}

#[tokio::test]
async fn test_coordinate_out_of_range() {
    let (router, _, _, renderer) = memory_router(RouterConfig::default());

    for uri in ["/tiles/1/2/0.png", "/tiles/1/0/2.png", "/tiles/1/-1/0.png"] {
        let response = get(&router, uri).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(response.json()["error"], "invalid_coordinate", "{}", uri);
    }
    assert_eq!(renderer.calls(), 0);
}

#[tokio::test]
async fn test_coordinate_not_a_number() {
    let (router, _, _, _) = memory_router(RouterConfig::default());

    let response = get(&router, "/tiles/2/1/abc.png").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_tile_id");
}

#[tokio::test]
async fn test_malformed_tile_ids() {
    let (router, _, _, renderer) = memory_router(RouterConfig::default());

    for uri in ["/tiles/1.png", "/tiles/04.png", "/tiles/012", "/tiles/0a.png"] {
        let response = get(&router, uri).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{}", uri);

        let body = response.json();
        assert_eq!(body["error"], "invalid_tile_id", "{}", uri);
        assert_eq!(body["status"], 400);
    }
    assert_eq!(renderer.calls(), 0);
}

#[tokio::test]
async fn test_unreachable_store_is_bad_gateway() {
    let router = unreliable_router(UnreliableStore::unreachable(), RetryPolicy::none());

    let response = get(&router, "/tiles/0.png").await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(response.json()["error"], "network_error");
}

// =============================================================================
// Rectangles
// =============================================================================

#[tokio::test]
async fn test_rect() {
    let (router, _, _, renderer) = memory_router(RouterConfig::default());

    let response = get(&router, "/rects/033.png").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.json(),
        json!({
            "id": "033.png",
            "zoom": 2,
            "x": 3,
            "y": 3,
            "rect": [1.0, 1.0, 2.0, 2.0],
            "parent": "03.png",
            "children": ["0330.png", "0331.png", "0332.png", "0333.png"],
            "ancestors": ["0", "03"],
        })
    );
    assert_eq!(renderer.calls(), 0);
}

#[tokio::test]
async fn test_root_rect_has_no_parent() {
    let (router, _, _, _) = memory_router(RouterConfig::default());

    let body = get(&router, "/rects/0.png").await.json();

    assert_eq!(body["rect"], json!([-2.0, -2.0, 2.0, 2.0]));
    assert!(body.get("parent").is_none());
    assert_eq!(body["ancestors"], json!([]));
}

// =============================================================================
// Documents
// =============================================================================

#[tokio::test]
async fn test_blob_served_after_render() {
    let (router, cache, _, _) = memory_router(RouterConfig::default());
    let tile = get(&router, "/tiles/03.png").await;

    // Handles point here before the render lands
    let url = cache.store().doc_url(TEST_DOC, "03.png");
    assert_eq!(url.path(), format!("/docs/{}/03.png", TEST_DOC));

    let blob = get(&router, url.path()).await;
    assert_eq!(blob.status, StatusCode::OK);
    assert_eq!(blob.header("content-type"), Some("image/png"));
    assert_eq!(blob.body, tile.body);
}

#[tokio::test]
async fn test_missing_blob_is_not_found() {
    let (router, _, _, _) = memory_router(RouterConfig::default());
    get(&router, "/tiles/0.png").await;

    let response = get(&router, &format!("/docs/{}/0123.png", TEST_DOC)).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json()["error"], "not_found");
}

#[tokio::test]
async fn test_list_blobs_by_ancestor_tag() {
    let (router, _, _, _) = memory_router(RouterConfig::default());
    for uri in ["/tiles/0.png", "/tiles/01.png", "/tiles/013.png", "/tiles/02.png"] {
        assert_eq!(get(&router, uri).await.status, StatusCode::OK);
    }

    let all = get(&router, &format!("/docs/{}", TEST_DOC)).await.json();
    assert_eq!(
        all["blobs"],
        json!(["0.png", "01.png", "013.png", "02.png"])
    );

    let under_01 = get(&router, &format!("/docs/{}?tag=01", TEST_DOC)).await.json();
    assert_eq!(under_01["tag"], "01");
    assert_eq!(under_01["blobs"], json!(["013.png"]));

    let under_root = get(&router, &format!("/docs/{}?tag=0", TEST_DOC)).await.json();
    assert_eq!(
        under_root["blobs"],
        json!(["01.png", "013.png", "02.png"])
    );
}

#[tokio::test]
async fn test_list_unknown_doc() {
    let (router, _, _, _) = memory_router(RouterConfig::default());

    let response = get(&router, "/docs/no-such-doc").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
