//! HTTP front end for the tile cache.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       HTTP Layer                         │
//! │   GET /tiles/{tile_id}    GET /tiles/{zoom}/{x}/{y}.png  │
//! │                                                          │
//! │      ┌──────────────────┐      ┌─────────────────┐       │
//! │      │     handlers     │      │     routes      │       │
//! │      │ (tiles, blobs)   │      │ (CORS, tracing) │       │
//! │      └──────────────────┘      └─────────────────┘       │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{AppState, ErrorResponse, HealthResponse, RectResponse};
pub use routes::{create_router, RouterConfig};
