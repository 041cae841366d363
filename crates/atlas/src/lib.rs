//! Rectangle packing for shared backend textures.
//!
//! A [`Backend`] is the bookkeeping half of one large physical texture: a
//! grid of fixed-size cells with an occupancy bitmap. Regions are handed out
//! as [`RegionKey`]s that carry a per-slot generation, so a key that outlived
//! its region is rejected instead of freeing somebody else's pixels.

mod backend;
mod key;
mod layout;

pub use backend::{AtlasError, Backend};
pub use key::{BackendId, GenerationId, Id, RegionKey, SlotId};
pub use layout::{BackendLayout, internal_image_size};

/// Axis-aligned pixel rectangle. `x`/`y` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub const fn right(self) -> u32 {
        self.x + self.width
    }

    pub const fn bottom(self) -> u32 {
        self.y + self.height
    }

    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn intersects(self, other: Rect) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Whether the rectangle lies inside a `width`x`height` surface anchored
    /// at the origin. Overflowing edges count as outside.
    pub fn contained_in(self, width: u32, height: u32) -> bool {
        self.x.checked_add(self.width).is_some_and(|right| right <= width)
            && self
                .y
                .checked_add(self.height)
                .is_some_and(|bottom| bottom <= height)
    }

    /// Byte length of a tightly packed RGBA8 payload covering this rectangle.
    pub fn rgba8_len(self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// Shifts the rectangle by `origin`, used to turn image-local coordinates
    /// into backend coordinates.
    pub const fn offset_by(self, origin: Rect) -> Rect {
        Rect::new(self.x + origin.x, self.y + origin.y, self.width, self.height)
    }
}
