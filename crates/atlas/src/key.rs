use std::fmt;
use std::marker::PhantomData;

#[derive(Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Id<Tag, Repr> {
    raw: Repr,
    _marker: PhantomData<Tag>,
}

impl<Tag, Repr: Copy> Copy for Id<Tag, Repr> {}

impl<Tag, Repr: Copy> Clone for Id<Tag, Repr> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Tag, Repr> Id<Tag, Repr> {
    pub const fn new(raw: Repr) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub const fn raw(self) -> Repr
    where
        Repr: Copy,
    {
        self.raw
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub enum BackendTag {}
pub type BackendId = Id<BackendTag, u16>;

#[derive(Debug, PartialEq, Eq, Hash)]
pub enum GenerationTag {}
pub type GenerationId = Id<GenerationTag, u16>;

/// Index of the top-left cell of a region inside its backend grid.
#[derive(Debug, PartialEq, Eq, Hash)]
pub enum SlotTag {}
pub type SlotId = Id<SlotTag, u32>;

/// Packed handle to one allocated region.
///
/// ```text
/// | backend (16) | generation (16) | slot (32) |
///  63         48  47            32  31       0
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionKey(u64);

impl RegionKey {
    const BACKEND_SHIFT: u32 = 48;
    const GENERATION_SHIFT: u32 = 32;

    pub fn new(backend: BackendId, generation: GenerationId, slot: SlotId) -> Self {
        RegionKey(
            u64::from(backend.raw()) << Self::BACKEND_SHIFT
                | u64::from(generation.raw()) << Self::GENERATION_SHIFT
                | u64::from(slot.raw()),
        )
    }

    pub fn backend(&self) -> BackendId {
        BackendId::new((self.0 >> Self::BACKEND_SHIFT) as u16)
    }

    pub fn generation(&self) -> GenerationId {
        GenerationId::new((self.0 >> Self::GENERATION_SHIFT) as u16)
    }

    pub fn slot(&self) -> SlotId {
        SlotId::new(self.0 as u32)
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "b{}/g{}/s{}",
            self.backend().raw(),
            self.generation().raw(),
            self.slot().raw()
        )
    }
}
