//! Pageforest tiles - tile addressing and render-on-miss tile server.
//!
//! This binary wires configuration, storage, rendering and HTTP together.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use image::RgbaImage;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pageforest_tiles::{
    config::{
        Cli, Command, CreateDocConfig, NameConfig, RectConfig, RenderConfig, ServeConfig,
        StorageBackend, StorageConfig,
    },
    server::{create_router, RouterConfig},
    storage::{create_s3_client, BlobStore, MemoryBlobStore, S3BlobStore},
    tile::{
        create_tile_doc, rect_from_tile_name, tile_name, MandelbrotRenderer, PngTileEncoder,
        TileCache, TileCacheConfig, TileId, TileRenderer,
    },
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(config) => run_serve(config).await,
        Command::Name(config) => run_name(config),
        Command::Rect(config) => run_rect(config),
        Command::Render(config) => run_render(config).await,
        Command::CreateDoc(config) => run_create_doc(config).await,
    }
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the default filter.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "pageforest_tiles=debug,tower_http=debug"
    } else {
        "pageforest_tiles=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Open the configured blob store.
async fn build_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>, String> {
    let public_url = config.public_url()?;

    let store: Arc<dyn BlobStore> = match config.storage {
        StorageBackend::Memory => Arc::new(MemoryBlobStore::new(public_url)),
        StorageBackend::S3 => {
            let client =
                create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;
            Arc::new(S3BlobStore::new(
                client,
                config.bucket().to_string(),
                config.s3_prefix.clone(),
                public_url,
            ))
        }
    };
    Ok(store)
}

fn print_json(value: &serde_json::Value) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let doc_id = config.doc.doc_id();

    info!("Pageforest tiles v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    match config.storage.storage {
        StorageBackend::Memory => {
            warn!("  Storage: memory - rendered tiles are lost on exit");
        }
        StorageBackend::S3 => {
            info!("  Storage: s3://{}/{}", config.storage.bucket(), config.storage.s3_prefix);
            if let Some(ref endpoint) = config.storage.s3_endpoint {
                info!("  S3 endpoint: {}", endpoint);
            }
            info!("  S3 region: {}", config.storage.s3_region);
        }
    }
    info!("  Document: {}", doc_id);
    info!(
        "  Tiles: {}px, root {:?}, {} iterations",
        config.tile_size,
        config.root.as_array(),
        config.max_iterations
    );

    let store = match build_store(&config.storage).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open storage: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if config.create_doc {
        match create_tile_doc(&store, &config.doc.doc_prefix, &config.doc.doc_version).await {
            Ok(created) if created != doc_id => {
                warn!(
                    "Created document {} but serving {}; check --doc-id",
                    created, doc_id
                );
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to create tile document: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let cache_config = TileCacheConfig::new(doc_id)
        .with_space(config.tile_space())
        .with_retry(config.retry_policy());
    let renderer = MandelbrotRenderer::with_max_iterations(config.max_iterations);
    let cache = Arc::new(TileCache::new(store, renderer, cache_config));

    let router = create_router(cache, build_router_config(&config));

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("Listening on http://{}", addr);
    info!("  curl http://{}/health", addr);
    info!("  curl -o 0.png http://{}/tiles/0.png", addr);

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::default()
        .with_cache_max_age(config.cache_max_age)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

// =============================================================================
// Addressing Commands
// =============================================================================

fn run_name(config: NameConfig) -> ExitCode {
    match tile_name(config.x, config.y, config.zoom) {
        Some(id) => {
            println!("{}", id);
            ExitCode::SUCCESS
        }
        None => {
            eprintln!(
                "Error: ({}, {}) is outside the grid at zoom {}",
                config.x, config.y, config.zoom
            );
            ExitCode::FAILURE
        }
    }
}

fn run_rect(config: RectConfig) -> ExitCode {
    let id = match TileId::parse(&config.tile_id) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let coord = id.coord();
    let rect = rect_from_tile_name(&config.root, &id);
    print_json(&serde_json::json!({
        "id": id,
        "zoom": coord.zoom,
        "x": coord.x,
        "y": coord.y,
        "rect": rect.as_array(),
    }))
}

async fn run_render(config: RenderConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let id = match TileId::parse(&config.tile_id) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let rect = rect_from_tile_name(&config.root, &id);
    let renderer = MandelbrotRenderer::with_max_iterations(config.max_iterations);
    let surface = RgbaImage::new(config.tile_size, config.tile_size);

    let encoded = match renderer.render(&id, rect, surface).await {
        Ok(image) => PngTileEncoder::new().encode(&image),
        Err(e) => Err(e),
    };
    let data = match encoded {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let path = config.output_path();
    if let Err(e) = tokio::fs::write(&path, &data).await {
        eprintln!("Error: failed to write {}: {}", path.display(), e);
        return ExitCode::FAILURE;
    }

    println!(
        "Wrote {} ({} bytes, rect {:?})",
        path.display(),
        data.len(),
        rect.as_array()
    );
    ExitCode::SUCCESS
}

// =============================================================================
// Create Doc Command
// =============================================================================

async fn run_create_doc(config: CreateDocConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.storage.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let store = match build_store(&config.storage).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open storage: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if config.storage.storage == StorageBackend::Memory {
        warn!("Memory storage selected; the document only lives for this process");
    }

    match create_tile_doc(&store, &config.doc_prefix, &config.doc_version).await {
        Ok(doc_id) => {
            println!("{}", doc_id);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to create tile document: {}", e);
            ExitCode::FAILURE
        }
    }
}
