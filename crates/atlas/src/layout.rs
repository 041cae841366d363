use crate::backend::AtlasError;
use crate::key::SlotId;

/// Smallest power of two that is at least `size` (and at least 1).
///
/// Textures and framebuffers of ordinary images are allocated at this size;
/// the output surface is the only exception.
pub const fn internal_image_size(size: u32) -> u32 {
    if size <= 1 {
        return 1;
    }
    size.next_power_of_two()
}

const CELL_AXIS_BITS: u32 = 16;
const CELL_AXIS_MASK: u32 = (1 << CELL_AXIS_BITS) - 1;

/// Geometry of one square backend texture cut into square cells.
///
/// Slots encode cell coordinates rather than a row-major index, so a slot
/// keeps naming the same cell when the backend grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendLayout {
    edge_px: u32,
    cell_px: u32,
}

impl BackendLayout {
    pub fn new(edge_px: u32, cell_px: u32) -> Result<Self, AtlasError> {
        if edge_px == 0
            || cell_px == 0
            || !edge_px.is_power_of_two()
            || cell_px > edge_px
            || edge_px % cell_px != 0
            || edge_px / cell_px > 1 << CELL_AXIS_BITS
        {
            return Err(AtlasError::InvalidLayout { edge_px, cell_px });
        }
        Ok(Self { edge_px, cell_px })
    }

    pub const fn edge_px(self) -> u32 {
        self.edge_px
    }

    pub const fn cell_px(self) -> u32 {
        self.cell_px
    }

    pub const fn cells_per_edge(self) -> u32 {
        self.edge_px / self.cell_px
    }

    pub const fn total_cells(self) -> u32 {
        let n = self.cells_per_edge();
        n * n
    }

    /// Number of cells needed to cover `px` pixels along one axis.
    pub const fn cells_for(self, px: u32) -> u32 {
        px.div_ceil(self.cell_px)
    }

    pub const fn slot_at(self, cell_x: u32, cell_y: u32) -> SlotId {
        SlotId::new(cell_y << CELL_AXIS_BITS | cell_x)
    }

    pub const fn cell_coords(self, slot: SlotId) -> (u32, u32) {
        let slot = slot.raw();
        (slot & CELL_AXIS_MASK, slot >> CELL_AXIS_BITS)
    }

    /// Row-major position of a cell in this layout's bitmaps.
    pub const fn cell_index(self, cell_x: u32, cell_y: u32) -> usize {
        (cell_y * self.cells_per_edge() + cell_x) as usize
    }

    pub const fn contains_slot(self, slot: SlotId) -> bool {
        let (cell_x, cell_y) = self.cell_coords(slot);
        let n = self.cells_per_edge();
        cell_x < n && cell_y < n
    }

    pub const fn pixel_origin(self, slot: SlotId) -> (u32, u32) {
        let (cell_x, cell_y) = self.cell_coords(slot);
        (cell_x * self.cell_px, cell_y * self.cell_px)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_size_rounds_up_to_power_of_two() {
        assert_eq!(internal_image_size(0), 1);
        assert_eq!(internal_image_size(1), 1);
        assert_eq!(internal_image_size(3), 4);
        assert_eq!(internal_image_size(16), 16);
        assert_eq!(internal_image_size(17), 32);
        assert_eq!(internal_image_size(1000), 1024);
    }

    #[test]
    fn slot_round_trips_through_cell_coords() {
        let layout = BackendLayout::new(256, 16).unwrap();
        assert_eq!(layout.cells_per_edge(), 16);
        let slot = layout.slot_at(5, 9);
        assert_eq!(layout.cell_coords(slot), (5, 9));
        assert_eq!(layout.pixel_origin(slot), (80, 144));
        assert_eq!(layout.cell_index(5, 9), 9 * 16 + 5);
    }

    #[test]
    fn slot_names_the_same_cell_in_a_larger_layout() {
        let small = BackendLayout::new(64, 16).unwrap();
        let large = BackendLayout::new(128, 16).unwrap();
        let slot = small.slot_at(3, 2);
        assert_eq!(large.cell_coords(slot), (3, 2));
        assert_eq!(large.pixel_origin(slot), small.pixel_origin(slot));
        assert!(!small.contains_slot(large.slot_at(4, 0)));
        assert!(large.contains_slot(large.slot_at(4, 0)));
    }

    #[test]
    fn rejects_cells_that_do_not_tile_the_edge() {
        assert!(BackendLayout::new(256, 24).is_err());
        assert!(BackendLayout::new(300, 10).is_err());
        assert!(BackendLayout::new(256, 512).is_err());
        assert!(BackendLayout::new(0, 16).is_err());
    }

    #[test]
    fn partial_cells_round_up() {
        let layout = BackendLayout::new(256, 16).unwrap();
        assert_eq!(layout.cells_for(1), 1);
        assert_eq!(layout.cells_for(16), 1);
        assert_eq!(layout.cells_for(17), 2);
    }
}
