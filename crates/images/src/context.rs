use atlas::{Id, Rect};

#[derive(Debug, PartialEq, Eq, Hash)]
pub enum TextureTag {}
pub type TextureHandle = Id<TextureTag, u64>;

#[derive(Debug, PartialEq, Eq, Hash)]
pub enum FramebufferTag {}
pub type FramebufferHandle = Id<FramebufferTag, u64>;

#[derive(Debug, PartialEq, Eq, Hash)]
pub enum PixelBufferTag {}
pub type PixelBufferHandle = Id<PixelBufferTag, u64>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphicsError {
    #[error("texture {width}x{height} could not be created: {reason}")]
    TextureCreation {
        width: u32,
        height: u32,
        reason: String,
    },
    #[error("framebuffer could not be created: {0}")]
    FramebufferCreation(String),
    #[error("pixel buffer of {size} bytes could not be created")]
    PixelBufferCreation { size: usize },
    #[error("texture handle is not known to the context")]
    UnknownTexture,
    #[error("framebuffer handle is not known to the context")]
    UnknownFramebuffer,
    #[error("pixel buffer handle is not known to the context")]
    UnknownPixelBuffer,
    #[error("pixel payload is {actual} bytes, expected {expected}")]
    PayloadLength { expected: usize, actual: usize },
    #[error("rectangle {rect:?} lies outside a {width}x{height} surface")]
    OutOfBounds { rect: Rect, width: u32, height: u32 },
    #[error("pixel buffers are not supported by this context")]
    PixelBuffersUnsupported,
    #[error("pixel buffer is not mapped")]
    NotMapped,
    #[error("pixel read-back failed: {0}")]
    ReadBack(String),
    #[error("no graphics device available: {0}")]
    DeviceUnavailable(String),
    #[error("graphics device lost")]
    DeviceLost,
}

/// Primitive operations of the graphics API binding.
///
/// All calls happen on the thread that owns the context. Pixel data is
/// tightly packed RGBA8. Deleting a handle the context no longer knows (for
/// example after a context loss) is a no-op.
pub trait GraphicsContext {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle, GraphicsError>;

    fn delete_texture(&mut self, texture: TextureHandle);

    /// Whether `texture` still names a live texture of this context.
    fn is_texture(&self, texture: TextureHandle) -> bool;

    fn create_framebuffer(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
    ) -> Result<FramebufferHandle, GraphicsError>;

    /// Wraps the platform's default render target at exactly `width`x`height`.
    fn screen_framebuffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<FramebufferHandle, GraphicsError>;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);

    fn set_viewport(&mut self, framebuffer: FramebufferHandle) -> Result<(), GraphicsError>;

    fn tex_sub_image_2d(
        &mut self,
        texture: TextureHandle,
        pixels: &[u8],
        rect: Rect,
    ) -> Result<(), GraphicsError>;

    /// Reads the top-left `width`x`height` pixels of `framebuffer`.
    fn framebuffer_pixels(
        &mut self,
        framebuffer: FramebufferHandle,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, GraphicsError>;

    fn flush(&mut self);

    fn supports_pixel_buffers(&self) -> bool {
        false
    }

    fn create_pixel_buffer(&mut self, _size: usize) -> Result<PixelBufferHandle, GraphicsError> {
        Err(GraphicsError::PixelBuffersUnsupported)
    }

    fn delete_pixel_buffer(&mut self, _buffer: PixelBufferHandle) {}

    fn map_pixel_buffer(&mut self, _buffer: PixelBufferHandle) -> Result<&mut [u8], GraphicsError> {
        Err(GraphicsError::PixelBuffersUnsupported)
    }

    fn unmap_pixel_buffer(&mut self, _buffer: PixelBufferHandle) -> Result<(), GraphicsError> {
        Err(GraphicsError::PixelBuffersUnsupported)
    }

    /// Uploads `rect` of `texture` from the bytes at `offset` in an unmapped
    /// pixel buffer.
    fn tex_sub_image_2d_from_buffer(
        &mut self,
        _texture: TextureHandle,
        _buffer: PixelBufferHandle,
        _offset: usize,
        _rect: Rect,
    ) -> Result<(), GraphicsError> {
        Err(GraphicsError::PixelBuffersUnsupported)
    }
}

/// Checks that `pixels` is a tightly packed RGBA8 payload for `rect`.
pub fn check_payload(pixels: &[u8], rect: Rect) -> Result<(), GraphicsError> {
    let expected = rect.rgba8_len();
    if pixels.len() != expected {
        return Err(GraphicsError::PayloadLength {
            expected,
            actual: pixels.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_bounds(rect: Rect, width: u32, height: u32) -> Result<(), GraphicsError> {
    if !rect.contained_in(width, height) {
        return Err(GraphicsError::OutOfBounds {
            rect,
            width,
            height,
        });
    }
    Ok(())
}
