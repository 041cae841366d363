use atlas::{Rect, internal_image_size};
use slotmap::SlotMap;

use crate::config::DriverConfig;
use crate::context::{FramebufferHandle, GraphicsContext, GraphicsError};
use crate::image::GpuImage;
use crate::transfer::TransferPath;

slotmap::new_key_type! {
    pub struct ImageId;
}

/// Owner of the graphics context and every GPU image created through it.
///
/// Every method that touches the context takes `&mut self`; the driver lives
/// on the thread that owns the graphics context.
#[derive(Debug)]
pub struct Driver<C: GraphicsContext> {
    context: C,
    transfer_path: TransferPath,
    images: SlotMap<ImageId, GpuImage>,
    source: Option<ImageId>,
    destination: Option<ImageId>,
    draw_called: bool,
}

impl<C: GraphicsContext> Driver<C> {
    pub fn new(context: C) -> Self {
        Self::with_config(context, DriverConfig::default())
    }

    pub fn with_config(context: C, config: DriverConfig) -> Self {
        let transfer_path = TransferPath::select(&context, &config);
        log::debug!("[images] driver started with {transfer_path:?} uploads");
        Self {
            context,
            transfer_path,
            images: SlotMap::with_key(),
            source: None,
            destination: None,
            draw_called: false,
        }
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    pub fn into_context(mut self) -> C {
        let ids: Vec<ImageId> = self.images.keys().collect();
        for id in ids {
            self.dispose(id);
        }
        self.context
    }

    pub fn transfer_path(&self) -> TransferPath {
        self.transfer_path
    }

    /// Allocates a texture-backed image. The texture is padded to the
    /// internal size; `width`x`height` is what reads and the framebuffer
    /// viewport expose.
    pub fn new_image(&mut self, width: u32, height: u32) -> Result<ImageId, GraphicsError> {
        let texture = self
            .context
            .create_texture(internal_image_size(width), internal_image_size(height))?;
        Ok(self
            .images
            .insert(GpuImage::with_texture(texture, width, height)))
    }

    /// Image standing for the platform's output surface. It has no texture.
    pub fn new_screen_image(&mut self, width: u32, height: u32) -> ImageId {
        self.images.insert(GpuImage::screen(width, height))
    }

    pub fn image(&self, id: ImageId) -> Option<&GpuImage> {
        self.images.get(id)
    }

    pub fn contains(&self, id: ImageId) -> bool {
        self.images.contains_key(id)
    }

    pub fn live_images(&self) -> usize {
        self.images.len()
    }

    pub fn source(&self) -> Option<ImageId> {
        self.source
    }

    pub fn destination(&self) -> Option<ImageId> {
        self.destination
    }

    /// Called by the draw issuer after submitting a draw command.
    pub fn record_draw(&mut self) {
        self.draw_called = true;
    }

    pub fn draw_pending_flush(&self) -> bool {
        self.draw_called
    }

    pub fn flush(&mut self) {
        self.context.flush();
        self.draw_called = false;
    }

    pub fn set_as_destination(&mut self, id: ImageId) -> Result<(), GraphicsError> {
        self.resolve(id, "set_as_destination")?;
        let image = image_mut(&mut self.images, id, "set_as_destination");
        image.set_viewport(&mut self.context)?;
        self.destination = Some(id);
        Ok(())
    }

    pub fn set_as_source(&mut self, id: ImageId) -> Result<(), GraphicsError> {
        self.resolve(id, "set_as_source")?;
        self.source = Some(id);
        Ok(())
    }

    /// Queues a pixel replacement of `width`x`height` at `x`,`y`. Nothing
    /// reaches the GPU until the image is bound or read.
    ///
    /// # Panics
    ///
    /// Panics when `id` is the output surface or not a live image.
    pub fn replace_pixels(
        &mut self,
        id: ImageId,
        pixels: Vec<u8>,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) {
        image_mut(&mut self.images, id, "replace_pixels")
            .enqueue_replace(pixels, Rect::new(x, y, width, height));
    }

    /// Resolves pending edits and reads the whole image back.
    pub fn read_pixels(&mut self, id: ImageId) -> Result<Vec<u8>, GraphicsError> {
        self.resolve(id, "read_pixels")?;
        let image = image_mut(&mut self.images, id, "read_pixels");
        let framebuffer = image.ensure_framebuffer(&mut self.context)?;
        let (width, height) = (image.width, image.height);
        self.context.framebuffer_pixels(framebuffer, width, height)
    }

    pub fn ensure_framebuffer(&mut self, id: ImageId) -> Result<FramebufferHandle, GraphicsError> {
        image_mut(&mut self.images, id, "ensure_framebuffer").ensure_framebuffer(&mut self.context)
    }

    pub fn is_invalidated(&self, id: ImageId) -> bool {
        let Some(image) = self.images.get(id) else {
            panic!("images: is_invalidated called with an unknown image id");
        };
        image.is_invalidated(&self.context)
    }

    /// Releases the image's GPU resources. Disposing twice is a no-op.
    pub fn dispose(&mut self, id: ImageId) {
        let Some(mut image) = self.images.remove(id) else {
            return;
        };
        image.release(&mut self.context);
        if self.source == Some(id) {
            self.source = None;
        }
        if self.destination == Some(id) {
            self.destination = None;
        }
    }

    fn resolve(&mut self, id: ImageId, operation: &str) -> Result<(), GraphicsError> {
        let image = image_mut(&mut self.images, id, operation);
        image.resolve_pending(&mut self.context, self.transfer_path, &mut self.draw_called)
    }
}

fn image_mut<'a>(
    images: &'a mut SlotMap<ImageId, GpuImage>,
    id: ImageId,
    operation: &str,
) -> &'a mut GpuImage {
    match images.get_mut(id) {
        Some(image) => image,
        None => panic!("images: {operation} called with an unknown image id"),
    }
}
