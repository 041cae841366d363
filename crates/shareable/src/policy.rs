use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid sharing policy: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{field} must be non-zero")]
    Zero { field: &'static str },
    #[error("{field} {value} is not a power of two")]
    NotPowerOfTwo { field: &'static str, value: u32 },
    #[error("min backend size {min_backend_size} exceeds max backend size {max_backend_size}")]
    BackendSizesReversed {
        min_backend_size: u32,
        max_backend_size: u32,
    },
    #[error("cell size {cell_size} does not divide min backend size {min_backend_size}")]
    CellSizeMismatch {
        min_backend_size: u32,
        cell_size: u32,
    },
    #[error("max shared size {max_shared_size} exceeds max backend size {max_backend_size}")]
    MaxSharedSizeTooLarge {
        max_shared_size: u32,
        max_backend_size: u32,
    },
}

/// Sizing thresholds for shared backends.
///
/// A shared backend starts at `min_backend_size` (or the smallest power of
/// two that holds its first image) and doubles in place, up to
/// `max_backend_size`, before another backend is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SharingPolicy {
    /// Edge of a freshly created shared backend texture, in pixels.
    pub min_backend_size: u32,
    /// Edge a shared backend may grow to, in pixels.
    pub max_backend_size: u32,
    /// Edge of one allocation cell; regions are rounded up to whole cells.
    pub cell_size: u32,
    /// Images larger than this in either dimension always stay standalone.
    pub max_shared_size: u32,
    /// Live images needed before new or existing images are packed together.
    pub population_threshold: usize,
}

impl Default for SharingPolicy {
    fn default() -> Self {
        Self {
            min_backend_size: 256,
            max_backend_size: 2048,
            cell_size: 16,
            max_shared_size: 256,
            population_threshold: 32,
        }
    }
}

impl SharingPolicy {
    /// Small fixed-size backends that share from the first image; handy in
    /// tests and tools where the whole atlas should stay easy to inspect.
    pub fn tiny() -> Self {
        Self {
            min_backend_size: 64,
            max_backend_size: 64,
            cell_size: 8,
            max_shared_size: 32,
            population_threshold: 0,
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, PolicyError> {
        let policy: Self = toml::from_str(source)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        for (field, value) in [
            ("min_backend_size", self.min_backend_size),
            ("max_backend_size", self.max_backend_size),
            ("cell_size", self.cell_size),
            ("max_shared_size", self.max_shared_size),
        ] {
            if value == 0 {
                return Err(PolicyError::Zero { field });
            }
        }
        for (field, value) in [
            ("min_backend_size", self.min_backend_size),
            ("max_backend_size", self.max_backend_size),
        ] {
            if !value.is_power_of_two() {
                return Err(PolicyError::NotPowerOfTwo { field, value });
            }
        }
        if self.min_backend_size > self.max_backend_size {
            return Err(PolicyError::BackendSizesReversed {
                min_backend_size: self.min_backend_size,
                max_backend_size: self.max_backend_size,
            });
        }
        if self.min_backend_size % self.cell_size != 0 {
            return Err(PolicyError::CellSizeMismatch {
                min_backend_size: self.min_backend_size,
                cell_size: self.cell_size,
            });
        }
        if self.max_shared_size > self.max_backend_size {
            return Err(PolicyError::MaxSharedSizeTooLarge {
                max_shared_size: self.max_shared_size,
                max_backend_size: self.max_backend_size,
            });
        }
        Ok(())
    }

    /// Whether an image of this size may ever live in a shared backend.
    pub fn fits_shared(&self, width: u32, height: u32) -> bool {
        width > 0 && height > 0 && width <= self.max_shared_size && height <= self.max_shared_size
    }

    /// Edge of a new shared backend whose first region is `width`x`height`.
    pub fn initial_backend_size(&self, width: u32, height: u32) -> u32 {
        let mut edge = self.min_backend_size;
        while edge < width.max(height) && edge < self.max_backend_size {
            edge *= 2;
        }
        edge
    }
}
