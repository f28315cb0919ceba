//! Integer and floating-point pixel boxes.
//!
//! Pixel `(x, y)` covers the area `[x - 0.5, x + 0.5) × [y - 0.5, y + 0.5)`,
//! so an integer box with inclusive bounds `min..=max` converts to the
//! half-open float box `[min - 0.5, max + 0.5)`.

use glam::DVec2;

/// Axis-aligned box of parent pixel indices with inclusive bounds.
///
/// A box with `x_max < x_min` or `y_max < y_min` is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Box2I {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl Box2I {
    #[inline]
    pub const fn new(x_min: i32, y_min: i32, x_max: i32, y_max: i32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Box starting at `(x0, y0)` spanning `width × height` pixels.
    pub fn from_origin_size(x0: i32, y0: i32, width: usize, height: usize) -> Self {
        Self::new(x0, y0, x0 + width as i32 - 1, y0 + height as i32 - 1)
    }

    /// Empty box with inverted bounds, ready for [`Box2I::include`].
    #[inline]
    pub const fn empty() -> Self {
        Self {
            x_min: i32::MAX,
            y_min: i32::MAX,
            x_max: i32::MIN,
            y_max: i32::MIN,
        }
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.x_max < self.x_min || self.y_max < self.y_min
    }

    /// Grow the box to include pixel `(x, y)`.
    #[inline]
    pub fn include(&mut self, x: i32, y: i32) {
        self.x_min = self.x_min.min(x);
        self.x_max = self.x_max.max(x);
        self.y_min = self.y_min.min(y);
        self.y_max = self.y_max.max(y);
    }

    /// Grow by `margin` pixels on every side.
    pub fn grown(&self, margin: i32) -> Self {
        if self.is_empty() {
            return *self;
        }
        Self::new(
            self.x_min.saturating_sub(margin),
            self.y_min.saturating_sub(margin),
            self.x_max.saturating_add(margin),
            self.y_max.saturating_add(margin),
        )
    }

    #[inline]
    pub const fn width(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.x_max - self.x_min + 1) as usize
        }
    }

    #[inline]
    pub const fn height(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.y_max - self.y_min + 1) as usize
        }
    }

    #[inline]
    pub const fn area(&self) -> usize {
        self.width() * self.height()
    }

    #[inline]
    pub const fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    pub fn contains_box(&self, other: &Box2I) -> bool {
        other.is_empty()
            || (self.contains(other.x_min, other.y_min) && self.contains(other.x_max, other.y_max))
    }

    /// Overlap of two boxes; empty when they are disjoint.
    pub fn intersection(&self, other: &Box2I) -> Box2I {
        Box2I::new(
            self.x_min.max(other.x_min),
            self.y_min.max(other.y_min),
            self.x_max.min(other.x_max),
            self.y_max.min(other.y_max),
        )
    }
}

/// Axis-aligned floating-point box, half-open: `min <= p < max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Box2D {
    pub min: DVec2,
    pub max: DVec2,
}

impl Box2D {
    pub fn new(min: DVec2, max: DVec2) -> Self {
        Self { min, max }
    }

    /// A point exactly on the upper edge is outside.
    #[inline]
    pub fn contains(&self, p: DVec2) -> bool {
        p.x >= self.min.x && p.x < self.max.x && p.y >= self.min.y && p.y < self.max.y
    }
}

impl From<Box2I> for Box2D {
    fn from(b: Box2I) -> Self {
        Self {
            min: DVec2::new(b.x_min as f64 - 0.5, b.y_min as f64 - 0.5),
            max: DVec2::new(b.x_max as f64 + 0.5, b.y_max as f64 + 0.5),
        }
    }
}
