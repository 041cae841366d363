use std::collections::HashMap;

use bitvec::prelude::{BitVec, Lsb0};

use crate::Rect;
use crate::key::{BackendId, GenerationId, RegionKey, SlotId};
use crate::layout::BackendLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AtlasError {
    #[error("region size must be non-zero")]
    ZeroSize,
    #[error("region {width}x{height} does not fit in a backend")]
    RegionTooLarge { width: u32, height: u32 },
    #[error("backend has no free region of the requested size")]
    OutOfSpace,
    #[error("region key belongs to another backend")]
    WrongBackend,
    #[error("region key does not name a live region")]
    InvalidSlot,
    #[error("region key generation is stale")]
    GenerationMismatch,
    #[error("backend edge {edge_px} cannot be split into {cell_px}px cells")]
    InvalidLayout { edge_px: u32, cell_px: u32 },
}

#[derive(Debug, Clone, Copy)]
struct LiveRegion {
    cells_wide: u32,
    cells_high: u32,
    rect: Rect,
}

/// Occupancy bookkeeping for one shared backend texture.
///
/// Placement is first fit over the cell grid: rows are scanned top to bottom
/// and cells left to right, so for a given history of allocations and frees
/// the layout is fully deterministic.
#[derive(Debug, Clone)]
pub struct Backend {
    backend_id: BackendId,
    layout: BackendLayout,
    // one bit per cell, indexed by layout.cell_index(); len == layout.total_cells()
    occupancy: BitVec<usize, Lsb0>,
    generations: Box<[GenerationId]>,
    live: HashMap<u32, LiveRegion>,
}

impl Backend {
    pub fn new(layout: BackendLayout, backend_id: BackendId) -> Self {
        let total_cells = layout.total_cells() as usize;
        Self {
            backend_id,
            layout,
            occupancy: BitVec::repeat(false, total_cells),
            generations: vec![GenerationId::new(0); total_cells].into_boxed_slice(),
            live: HashMap::new(),
        }
    }

    pub fn alloc(&mut self, width: u32, height: u32) -> Result<(RegionKey, Rect), AtlasError> {
        if width == 0 || height == 0 {
            return Err(AtlasError::ZeroSize);
        }
        if width > self.layout.edge_px() || height > self.layout.edge_px() {
            return Err(AtlasError::RegionTooLarge { width, height });
        }

        let cells_wide = self.layout.cells_for(width);
        let cells_high = self.layout.cells_for(height);
        let Some((cell_x, cell_y)) = self.find_free(cells_wide, cells_high) else {
            return Err(AtlasError::OutOfSpace);
        };

        self.fill(cell_x, cell_y, cells_wide, cells_high, true);
        let slot = self.layout.slot_at(cell_x, cell_y);
        let (origin_x, origin_y) = self.layout.pixel_origin(slot);
        let rect = Rect::new(origin_x, origin_y, width, height);
        self.live.insert(
            slot.raw(),
            LiveRegion {
                cells_wide,
                cells_high,
                rect,
            },
        );
        let generation = self.generations[self.layout.cell_index(cell_x, cell_y)];
        Ok((RegionKey::new(self.backend_id, generation, slot), rect))
    }

    pub fn free(&mut self, key: RegionKey) -> Result<Rect, AtlasError> {
        let region = self.live_region(key)?;
        let slot = key.slot();
        let (cell_x, cell_y) = self.layout.cell_coords(slot);
        self.fill(cell_x, cell_y, region.cells_wide, region.cells_high, false);
        self.live.remove(&slot.raw());

        let index = self.layout.cell_index(cell_x, cell_y);
        let generation = self.generations[index].raw().wrapping_add(1);
        self.generations[index] = GenerationId::new(generation);
        Ok(region.rect)
    }

    pub fn region(&self, key: RegionKey) -> Option<Rect> {
        self.live_region(key).ok().map(|region| region.rect)
    }

    pub fn live_regions(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn occupied_cells(&self) -> usize {
        self.occupancy.count_ones()
    }

    pub const fn backend_id(&self) -> BackendId {
        self.backend_id
    }

    pub const fn layout(&self) -> BackendLayout {
        self.layout
    }

    /// Copy of this backend on a larger grid with the same cell size.
    ///
    /// Live regions keep their keys and pixel positions; the new cells are
    /// free and sit to the right of and below the old grid.
    pub fn grown(&self, edge_px: u32) -> Result<Self, AtlasError> {
        let cell_px = self.layout.cell_px();
        let layout = BackendLayout::new(edge_px, cell_px)?;
        if edge_px < self.layout.edge_px() {
            return Err(AtlasError::InvalidLayout { edge_px, cell_px });
        }

        let mut grown = Backend::new(layout, self.backend_id);
        let old_cells = self.layout.cells_per_edge();
        for cell_y in 0..old_cells {
            for cell_x in 0..old_cells {
                let from = self.layout.cell_index(cell_x, cell_y);
                let to = layout.cell_index(cell_x, cell_y);
                grown.occupancy.set(to, self.occupancy[from]);
                grown.generations[to] = self.generations[from];
            }
        }
        grown.live = self.live.clone();
        Ok(grown)
    }

    fn live_region(&self, key: RegionKey) -> Result<LiveRegion, AtlasError> {
        if key.backend() != self.backend_id {
            return Err(AtlasError::WrongBackend);
        }
        let slot = key.slot();
        if !self.layout.contains_slot(slot) {
            return Err(AtlasError::InvalidSlot);
        }
        let (cell_x, cell_y) = self.layout.cell_coords(slot);
        let current_generation = self.generations[self.layout.cell_index(cell_x, cell_y)];
        if current_generation != key.generation() {
            return Err(AtlasError::GenerationMismatch);
        }
        self.live
            .get(&slot.raw())
            .copied()
            .ok_or(AtlasError::InvalidSlot)
    }

    fn find_free(&self, cells_wide: u32, cells_high: u32) -> Option<(u32, u32)> {
        let per_edge = self.layout.cells_per_edge();
        if cells_wide > per_edge || cells_high > per_edge {
            return None;
        }
        for cell_y in 0..=(per_edge - cells_high) {
            let mut cell_x = 0;
            while cell_x + cells_wide <= per_edge {
                match self.first_occupied_in(cell_x, cell_y, cells_wide, cells_high) {
                    None => return Some((cell_x, cell_y)),
                    // nothing starting at or before the blocker can fit
                    Some(blocked_x) => cell_x = blocked_x + 1,
                }
            }
        }
        None
    }

    /// Right-most occupied column inside the candidate rectangle, if any.
    fn first_occupied_in(
        &self,
        cell_x: u32,
        cell_y: u32,
        cells_wide: u32,
        cells_high: u32,
    ) -> Option<u32> {
        let per_edge = self.layout.cells_per_edge();
        let mut blocker = None;
        for y in cell_y..cell_y + cells_high {
            let row = (y * per_edge) as usize;
            let span = &self.occupancy[row + cell_x as usize..row + (cell_x + cells_wide) as usize];
            if let Some(last) = span.last_one() {
                let x = cell_x + last as u32;
                blocker = Some(blocker.map_or(x, |current: u32| current.max(x)));
            }
        }
        blocker
    }

    fn fill(&mut self, cell_x: u32, cell_y: u32, cells_wide: u32, cells_high: u32, value: bool) {
        let per_edge = self.layout.cells_per_edge();
        for y in cell_y..cell_y + cells_high {
            let row = (y * per_edge) as usize;
            self.occupancy[row + cell_x as usize..row + (cell_x + cells_wide) as usize]
                .fill(value);
        }
    }
}
