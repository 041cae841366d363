//! Shared backends: many small logical images packed into a few large
//! textures, with standalone textures for everything that should not share.

mod deferred;
mod manager;
mod policy;

pub use deferred::{DeferredOp, DeferredQueue};
pub use manager::{BoundRegion, LogicalImageId, ShareError, SharedBackendManager};
pub use policy::{PolicyError, SharingPolicy};
