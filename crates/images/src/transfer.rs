//! Upload paths from pending edits into textures.

use crate::config::DriverConfig;
use crate::context::{GraphicsContext, GraphicsError, PixelBufferHandle, TextureHandle};
use crate::edits::PixelEdit;

/// How pending edits reach a texture. Chosen once when the driver starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPath {
    /// One synchronous sub-image upload per edit.
    Direct,
    /// Edits are staged in a mapped pixel buffer, then uploaded from it.
    PixelBuffer,
}

impl TransferPath {
    pub fn select<C: GraphicsContext>(context: &C, config: &DriverConfig) -> Self {
        if config.prefer_pixel_buffers && context.supports_pixel_buffers() {
            TransferPath::PixelBuffer
        } else {
            TransferPath::Direct
        }
    }
}

/// A pixel buffer owned by one image, grown on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StagingBuffer {
    pub handle: PixelBufferHandle,
    pub size: usize,
}

pub(crate) fn upload_direct<C: GraphicsContext>(
    context: &mut C,
    texture: TextureHandle,
    edits: &[PixelEdit],
) -> Result<(), GraphicsError> {
    for edit in edits {
        context.tex_sub_image_2d(texture, &edit.pixels, edit.rect)?;
    }
    Ok(())
}

/// Writes all edits into the staging buffer under a single map/unmap, then
/// uploads each edit from its offset in submission order.
pub(crate) fn upload_via_pixel_buffer<C: GraphicsContext>(
    context: &mut C,
    texture: TextureHandle,
    staging: &mut Option<StagingBuffer>,
    edits: &[PixelEdit],
) -> Result<(), GraphicsError> {
    let mut total = 0usize;
    for edit in edits {
        let expected = edit.rect.rgba8_len();
        if edit.pixels.len() != expected {
            return Err(GraphicsError::PayloadLength {
                expected,
                actual: edit.pixels.len(),
            });
        }
        total += expected;
    }

    let buffer = ensure_staging(context, staging, total)?;

    let mapped = context.map_pixel_buffer(buffer)?;
    let mut offset = 0;
    for edit in edits {
        let end = offset + edit.pixels.len();
        mapped[offset..end].copy_from_slice(&edit.pixels);
        offset = end;
    }
    context.unmap_pixel_buffer(buffer)?;

    let mut offset = 0;
    for edit in edits {
        context.tex_sub_image_2d_from_buffer(texture, buffer, offset, edit.rect)?;
        offset += edit.pixels.len();
    }
    Ok(())
}

fn ensure_staging<C: GraphicsContext>(
    context: &mut C,
    staging: &mut Option<StagingBuffer>,
    size: usize,
) -> Result<PixelBufferHandle, GraphicsError> {
    if let Some(existing) = staging {
        if existing.size >= size {
            return Ok(existing.handle);
        }
        context.delete_pixel_buffer(existing.handle);
        *staging = None;
    }
    let handle = context.create_pixel_buffer(size)?;
    log::debug!("[images] staging buffer grown to {size} bytes");
    *staging = Some(StagingBuffer { handle, size });
    Ok(handle)
}
