use atlas::internal_image_size;

use crate::context::{FramebufferHandle, GraphicsContext, GraphicsError};
use crate::image::GpuImage;

impl GpuImage {
    /// Creates the image's framebuffer on first use and returns it.
    ///
    /// The screen framebuffer keeps the exact declared size: the default
    /// render target cannot be rounded up, and some platforms reject a
    /// viewport larger than the drawing area. Ordinary images use the padded
    /// internal size their texture was allocated with. On failure the image
    /// stays without a framebuffer so the next call retries.
    pub(crate) fn ensure_framebuffer<C: GraphicsContext>(
        &mut self,
        context: &mut C,
    ) -> Result<FramebufferHandle, GraphicsError> {
        if let Some(framebuffer) = self.framebuffer {
            return Ok(framebuffer);
        }

        let framebuffer = if self.screen {
            context.screen_framebuffer(self.width, self.height)?
        } else {
            let Some(texture) = self.texture else {
                return Err(GraphicsError::UnknownTexture);
            };
            let width = internal_image_size(self.width);
            let height = internal_image_size(self.height);
            context.create_framebuffer(texture, width, height)?
        };
        self.framebuffer = Some(framebuffer);
        Ok(framebuffer)
    }

    pub(crate) fn set_viewport<C: GraphicsContext>(
        &mut self,
        context: &mut C,
    ) -> Result<(), GraphicsError> {
        let framebuffer = self.ensure_framebuffer(context)?;
        context.set_viewport(framebuffer)
    }
}
