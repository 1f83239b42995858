//! Tile rendering.
//!
//! The cache does not draw anything itself; on a miss it hands a blank
//! surface to a [`TileRenderer`] and stores whatever comes back. The future
//! resolving is the "done" signal.
//!
//! [`MandelbrotRenderer`] is the renderer used by the tile server: the tile
//! rectangle is a window on the complex plane, coloured by escape time.

use std::sync::Arc;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};

use super::address::{TileId, TileRect};
use crate::error::TileError;

/// Default escape-time iteration limit.
pub const DEFAULT_MAX_ITERATIONS: u32 = 256;

/// Colour of points inside the set.
const INSIDE: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Draws tiles on demand.
#[async_trait]
pub trait TileRenderer: Send + Sync {
    /// Draw tile `id`, covering `rect`, into `surface` and return it.
    async fn render(
        &self,
        id: &TileId,
        rect: TileRect,
        surface: RgbaImage,
    ) -> Result<RgbaImage, TileError>;
}

#[async_trait]
impl<T: TileRenderer + ?Sized> TileRenderer for Arc<T> {
    async fn render(
        &self,
        id: &TileId,
        rect: TileRect,
        surface: RgbaImage,
    ) -> Result<RgbaImage, TileError> {
        (**self).render(id, rect, surface).await
    }
}

// =============================================================================
// Mandelbrot
// =============================================================================

/// Escape-time Mandelbrot renderer.
#[derive(Debug, Clone, Copy)]
pub struct MandelbrotRenderer {
    max_iterations: u32,
}

impl MandelbrotRenderer {
    pub fn new() -> Self {
        Self::with_max_iterations(DEFAULT_MAX_ITERATIONS)
    }

    pub fn with_max_iterations(max_iterations: u32) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Draw synchronously. Each pixel samples the point at its centre.
    pub fn draw(&self, rect: &TileRect, surface: &mut RgbaImage) {
        let (width, height) = surface.dimensions();

        for (px, py, pixel) in surface.enumerate_pixels_mut() {
            let (cx, cy) = rect.pixel_centre(px, py, width, height);
            *pixel = match escape_time(cx, cy, self.max_iterations) {
                Some(n) => colour(n, self.max_iterations),
                None => INSIDE,
            };
        }
    }
}

impl Default for MandelbrotRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TileRenderer for MandelbrotRenderer {
    async fn render(
        &self,
        id: &TileId,
        rect: TileRect,
        mut surface: RgbaImage,
    ) -> Result<RgbaImage, TileError> {
        let renderer = *self;
        tokio::task::spawn_blocking(move || {
            renderer.draw(&rect, &mut surface);
            surface
        })
        .await
        .map_err(|e| TileError::Render {
            tile_id: id.to_string(),
            message: e.to_string(),
        })
    }
}

/// Iterations before `z -> z^2 + c` leaves radius 2, or `None` if it never does.
pub fn escape_time(cx: f64, cy: f64, max_iterations: u32) -> Option<u32> {
    let (mut x, mut y) = (0.0f64, 0.0f64);
    for n in 0..max_iterations {
        let (x2, y2) = (x * x, y * y);
        if x2 + y2 > 4.0 {
            return Some(n);
        }
        y = 2.0 * x * y + cy;
        x = x2 - y2 + cx;
    }
    None
}

/// Bernstein-polynomial palette over the normalised escape time.
fn colour(n: u32, max_iterations: u32) -> Rgba<u8> {
    let t = f64::from(n) / f64::from(max_iterations);
    let u = 1.0 - t;
    let channel = |v: f64| (v * 255.0).clamp(0.0, 255.0) as u8;
    Rgba([
        channel(9.0 * u * t * t * t),
        channel(15.0 * u * u * t * t),
        channel(8.5 * u * u * u * t),
        255,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_time() {
        assert_eq!(escape_time(0.0, 0.0, 100), None);
        assert_eq!(escape_time(-1.0, 0.0, 100), None);
        assert_eq!(escape_time(2.0, 2.0, 100), Some(1));
        assert!(escape_time(0.5, 0.5, 100).is_some());
    }

    #[test]
    fn test_draw_marks_interior_black() {
        let renderer = MandelbrotRenderer::with_max_iterations(64);
        // Small window around the origin, entirely inside the main cardioid
        let rect = TileRect::new(-0.1, -0.1, 0.1, 0.1);
        let mut surface = RgbaImage::new(8, 8);
        renderer.draw(&rect, &mut surface);
        assert!(surface.pixels().all(|p| *p == INSIDE));
    }

    #[test]
    fn test_draw_outside_is_opaque_colour() {
        let renderer = MandelbrotRenderer::new();
        let rect = TileRect::new(1.0, 1.0, 2.0, 2.0);
        let mut surface = RgbaImage::new(4, 4);
        renderer.draw(&rect, &mut surface);
        assert!(surface.pixels().all(|p| p.0[3] == 255 && *p != INSIDE));
    }

    #[test]
    fn test_max_iterations_floor() {
        assert_eq!(MandelbrotRenderer::with_max_iterations(0).max_iterations(), 1);
    }

    #[tokio::test]
    async fn test_render_returns_filled_surface() {
        let renderer = MandelbrotRenderer::with_max_iterations(32);
        let rect = TileRect::new(-2.0, -2.0, 2.0, 2.0);
        let surface = renderer
            .render(&TileId::root(), rect, RgbaImage::new(16, 16))
            .await
            .unwrap();
        assert_eq!(surface.dimensions(), (16, 16));
        assert!(surface.pixels().all(|p| p.0[3] == 255));
    }
}
