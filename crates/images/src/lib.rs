//! GPU images: one texture per image, a lazily created framebuffer, and a
//! queue of pixel edits resolved just before the image is bound or read.
//!
//! The [`Driver`] owns the [`GraphicsContext`] and every image created
//! through it. Images are addressed by [`ImageId`].

mod config;
mod context;
mod driver;
mod edits;
mod framebuffer;
mod image;
mod software;
mod transfer;
#[cfg(feature = "wgpu-backend")]
mod wgpu_context;

pub use atlas::Rect;
pub use config::{ConfigError, DriverConfig};
pub use context::{
    FramebufferHandle, FramebufferTag, GraphicsContext, GraphicsError, PixelBufferHandle,
    PixelBufferTag, TextureHandle, TextureTag, check_payload,
};
pub use driver::{Driver, ImageId};
pub use edits::{PendingEdits, PixelEdit};
pub use image::GpuImage;
pub use software::{ContextCall, SoftwareContext};
pub use transfer::TransferPath;
#[cfg(feature = "wgpu-backend")]
pub use wgpu_context::WgpuContext;

#[cfg(test)]
mod tests;
