//! Tile cache behaviour seen through the public API.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use pageforest_tiles::storage::{BlobOptions, BlobStore, MemoryBlobStore};
use pageforest_tiles::tile::{
    create_tile_doc, RetryPolicy, TileCache, TileId, TileSource, TileState,
};
use pageforest_tiles::{create_router, RouterConfig};

use super::test_utils::{
    get, memory_cache, memory_router, test_cache_config, unreliable_router, CountingRenderer,
    UnreliableStore, TEST_DOC,
};

fn id(s: &str) -> TileId {
    TileId::parse(s).unwrap()
}

// Behaviour change: overlapping first requests for a tile used to render and
// upload it once each. They now share a single render.
#[tokio::test]
async fn test_concurrent_http_requests_render_once() {
    let renderer = CountingRenderer::with_delay(Duration::from_millis(50));
    let (cache, store) = memory_cache(renderer.clone());
    let router = create_router(
        Arc::clone(&cache),
        RouterConfig::default().with_tracing(false),
    );

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let router = router.clone();
            tokio::spawn(async move { get(&router, "/tiles/0212.png").await })
        })
        .collect();

    let mut bodies = Vec::new();
    for task in tasks {
        let response = task.await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        bodies.push(response.body);
    }

    assert_eq!(renderer.calls(), 1);
    assert!(bodies.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(store.list_blobs(TEST_DOC, None).await.unwrap(), ["0212.png"]);
}

#[tokio::test]
async fn test_get_image_renders_in_background() {
    let renderer = CountingRenderer::default();
    let (cache, store) = memory_cache(renderer.clone());
    let tile = id("0301.png");

    let image = cache.get_image(&tile).await;
    assert!(Arc::ptr_eq(&image, &cache.get_image(&tile).await));

    // Wait for the spawned check/render
    for _ in 0..100 {
        if image.is_rendered().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(image.is_rendered().await);
    assert_eq!(cache.state(&tile).await, Some(TileState::Cached));
    assert!(cache.check_tile_exists(&tile).await.unwrap());
    assert!(store.blob_exists(TEST_DOC, "0301.png").await.unwrap());
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn test_stored_tile_keeps_remote_source() {
    let store = Arc::new(MemoryBlobStore::default());
    store
        .put_blob(
            TEST_DOC,
            "01.png",
            bytes::Bytes::from_static(b"previously rendered"),
            &BlobOptions::png(),
        )
        .await
        .unwrap();
    let renderer = CountingRenderer::default();
    let cache = Arc::new(TileCache::new(store, renderer.clone(), test_cache_config()));
    let tile = id("01.png");

    let image = cache.get_image(&tile).await;
    assert_eq!(cache.check_and_render(&tile).await.unwrap(), TileState::Cached);

    match image.source().await {
        TileSource::Remote(url) => {
            assert_eq!(url.path(), format!("/docs/{}/01.png", TEST_DOC))
        }
        TileSource::Rendered(_) => panic!("stored tiles are not rendered again"),
    }
    assert_eq!(renderer.calls(), 0);
}

#[tokio::test]
async fn test_handle_url_is_served_by_router() {
    let (router, cache, _, _) = memory_router(RouterConfig::default());
    let tile = id("0231.png");

    let image = cache.get_image(&tile).await;
    let url = match image.source().await {
        TileSource::Remote(url) => url,
        TileSource::Rendered(_) => panic!("new handles start at the stored blob URL"),
    };

    for _ in 0..100 {
        if cache.state(&tile).await == Some(TileState::Cached) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let response = get(&router, url.path()).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some("image/png"));
    match image.source().await {
        TileSource::Rendered(png) => assert_eq!(response.body, png),
        TileSource::Remote(_) => panic!("handle should hold the rendered tile"),
    }
}

#[tokio::test]
async fn test_retry_recovers_from_transient_failures() {
    let router = unreliable_router(
        UnreliableStore::new(2),
        RetryPolicy::new(3, Duration::from_millis(1)),
    );

    let response = get(&router, "/tiles/0.png").await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_failed_check_is_retried_on_next_request() {
    let router = unreliable_router(UnreliableStore::new(1), RetryPolicy::none());

    let first = get(&router, "/tiles/0.png").await;
    assert_eq!(first.status, StatusCode::BAD_GATEWAY);

    let second = get(&router, "/tiles/0.png").await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.header("x-tile-cache-hit"), Some("false"));
}

#[tokio::test]
async fn test_tiles_land_in_created_doc() {
    let store = Arc::new(MemoryBlobStore::default());
    let doc_id = create_tile_doc(&store, "mandelbrot-tiles", "test")
        .await
        .unwrap();
    assert_eq!(doc_id, TEST_DOC);

    let cache = Arc::new(TileCache::new(
        Arc::clone(&store),
        CountingRenderer::default(),
        test_cache_config(),
    ));
    cache.check_and_render(&id("023.png")).await.unwrap();

    let doc = store.doc(TEST_DOC).await.unwrap();
    assert_eq!(doc.readers, ["public"]);
    assert_eq!(
        store.list_blobs(TEST_DOC, Some("02")).await.unwrap(),
        ["023.png"]
    );
}
