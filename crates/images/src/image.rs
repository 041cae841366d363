use atlas::Rect;

use crate::context::{FramebufferHandle, GraphicsContext, GraphicsError, TextureHandle};
use crate::edits::{PendingEdits, PixelEdit};
use crate::transfer::{self, StagingBuffer, TransferPath};

/// One physical texture (or the output surface) plus its lazily created
/// framebuffer, staging buffer and queued pixel edits.
#[derive(Debug)]
pub struct GpuImage {
    pub(crate) texture: Option<TextureHandle>,
    pub(crate) framebuffer: Option<FramebufferHandle>,
    pub(crate) staging: Option<StagingBuffer>,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) screen: bool,
    pub(crate) pending: PendingEdits,
}

impl GpuImage {
    pub(crate) fn with_texture(texture: TextureHandle, width: u32, height: u32) -> Self {
        Self {
            texture: Some(texture),
            framebuffer: None,
            staging: None,
            width,
            height,
            screen: false,
            pending: PendingEdits::new(),
        }
    }

    pub(crate) fn screen(width: u32, height: u32) -> Self {
        Self {
            texture: None,
            framebuffer: None,
            staging: None,
            width,
            height,
            screen: true,
            pending: PendingEdits::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_screen(&self) -> bool {
        self.screen
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    pub fn framebuffer(&self) -> Option<FramebufferHandle> {
        self.framebuffer
    }

    pub fn pending_edits(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_invalidated<C: GraphicsContext>(&self, context: &C) -> bool {
        match self.texture {
            Some(texture) => !context.is_texture(texture),
            None => false,
        }
    }

    pub(crate) fn enqueue_replace(&mut self, pixels: Vec<u8>, rect: Rect) {
        if self.screen {
            panic!("images: replace_pixels cannot be called on the screen, that doesn't have a texture");
        }
        self.pending.enqueue(PixelEdit { pixels, rect });
    }

    /// Applies every queued edit to the texture.
    ///
    /// `draw_called` is the driver-wide flag set after a draw was issued; it is
    /// flushed and cleared before the first upload.
    pub(crate) fn resolve_pending<C: GraphicsContext>(
        &mut self,
        context: &mut C,
        path: TransferPath,
        draw_called: &mut bool,
    ) -> Result<(), GraphicsError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        // Some drivers drop a sub-image upload that directly follows a draw.
        if *draw_called {
            context.flush();
        }
        *draw_called = false;

        let Some(texture) = self.texture else {
            unreachable!("only the screen lacks a texture, and it never queues edits");
        };
        let staging = &mut self.staging;
        let result = self.pending.drain_and_apply(|edits| match path {
            TransferPath::Direct => transfer::upload_direct(context, texture, edits),
            TransferPath::PixelBuffer => {
                transfer::upload_via_pixel_buffer(context, texture, staging, edits)
            }
        });
        if let Err(error) = &result {
            log::warn!("[images] pixel edit resolution failed: {error}");
        }
        result
    }

    /// Releases the staging buffer, framebuffer and texture, in that order.
    /// Calling it again does nothing.
    pub(crate) fn release<C: GraphicsContext>(&mut self, context: &mut C) {
        if let Some(staging) = self.staging.take() {
            context.delete_pixel_buffer(staging.handle);
        }
        if let Some(framebuffer) = self.framebuffer.take() {
            context.delete_framebuffer(framebuffer);
        }
        if let Some(texture) = self.texture.take() {
            context.delete_texture(texture);
        }
    }
}
