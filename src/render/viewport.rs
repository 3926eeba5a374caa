//! Viewport definition for rendering.
//!
//! A [`Viewport`] describes the area a [`MountPoint`](crate::mount::MountPoint) offers
//! to an engine. Both engines lay themselves out from it: the layered engine splits it
//! into page slots, the scene-graph engine derives its projection aspect ratio from it.
//!
//! # Examples
//!
//! ```
//! use flipbook_engine::render::Viewport;
//!
//! let mut vp = Viewport::new(0, 0, 800, 600);
//! vp.resize(1024, 768);
//! vp.translate(10, 20);
//! assert_eq!(vp.width, 1024);
//! assert_eq!(vp.x, 10);
//! ```

use crate::render::backend::SurfaceSize;

/// Represents the viewport for rendering.
#[derive(Clone, Eq, PartialEq, Copy, Default)]
pub struct Viewport {
    /// Horizontal offset in pixels from the origin.
    pub x: i32,

    /// Vertical offset in pixels from the origin.
    pub y: i32,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,
}

impl std::fmt::Debug for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Viewport {{ x: {}, y: {}, width: {}, height: {} }}",
            self.x, self.y, self.width, self.height
        )
    }
}

impl Viewport {
    /// Creates a new [`Viewport`] with the given position and size.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Resizes the viewport to the given width and height.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Moves the viewport’s origin to `(x, y)` in pixels.
    pub fn translate(&mut self, x: i32, y: i32) {
        self.x = x;
        self.y = y;
    }

    /// Returns the aspect ratio (`width / height`) as `f32`.
    ///
    /// Returns `1.0` if `height` is `0`, so a collapsed container still yields a usable projection.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Converts this viewport to a [`SurfaceSize`].
    pub fn as_size(&self) -> SurfaceSize {
        SurfaceSize {
            width: self.width,
            height: self.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_of_collapsed_viewport() {
        let vp = Viewport::new(0, 0, 300, 0);
        assert_eq!(vp.aspect_ratio(), 1.0);
    }

    #[test]
    fn as_size_drops_origin() {
        let vp = Viewport::new(5, 7, 640, 480);
        assert_eq!(vp.as_size(), SurfaceSize { width: 640, height: 480 });
        assert_eq!(vp.aspect_ratio(), 640.0 / 480.0);
    }
}
