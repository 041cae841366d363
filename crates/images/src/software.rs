//! Headless CPU implementation of [`GraphicsContext`].
//!
//! Textures are plain RGBA8 byte vectors. Every primitive call is appended to
//! a call log so callers can assert the order in which uploads, flushes and
//! read-backs reached the "GPU".

use std::collections::HashMap;

use atlas::Rect;

use crate::context::{
    FramebufferHandle, GraphicsContext, GraphicsError, PixelBufferHandle, TextureHandle,
    check_bounds, check_payload,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextCall {
    CreateTexture(TextureHandle),
    DeleteTexture(TextureHandle),
    CreateFramebuffer(FramebufferHandle),
    DeleteFramebuffer(FramebufferHandle),
    SetViewport(FramebufferHandle),
    Upload { texture: TextureHandle, rect: Rect },
    CreatePixelBuffer(PixelBufferHandle),
    DeletePixelBuffer(PixelBufferHandle),
    MapPixelBuffer(PixelBufferHandle),
    UnmapPixelBuffer(PixelBufferHandle),
    UploadFromBuffer { texture: TextureHandle, rect: Rect },
    ReadPixels(FramebufferHandle),
    Flush,
}

#[derive(Debug)]
struct SoftTexture {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

#[derive(Debug)]
enum SoftFramebuffer {
    Texture {
        texture: TextureHandle,
        width: u32,
        height: u32,
    },
    Screen {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
}

#[derive(Debug)]
struct SoftPixelBuffer {
    bytes: Vec<u8>,
    mapped: bool,
}

#[derive(Debug)]
pub struct SoftwareContext {
    next_handle: u64,
    textures: HashMap<u64, SoftTexture>,
    framebuffers: HashMap<u64, SoftFramebuffer>,
    pixel_buffers: HashMap<u64, SoftPixelBuffer>,
    supports_pixel_buffers: bool,
    texture_budget: Option<usize>,
    fail_framebuffers: bool,
    calls: Vec<ContextCall>,
}

impl Default for SoftwareContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareContext {
    /// Context that only offers the direct upload path.
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            pixel_buffers: HashMap::new(),
            supports_pixel_buffers: false,
            texture_budget: None,
            fail_framebuffers: false,
            calls: Vec::new(),
        }
    }

    /// Context that advertises pixel buffer support.
    pub fn with_pixel_buffers() -> Self {
        Self {
            supports_pixel_buffers: true,
            ..Self::new()
        }
    }

    /// Caps the number of live textures; creation beyond the cap fails.
    pub fn set_texture_budget(&mut self, budget: Option<usize>) {
        self.texture_budget = budget;
    }

    /// Makes every framebuffer creation, the screen's included, fail until
    /// reset.
    pub fn set_fail_framebuffers(&mut self, fail: bool) {
        self.fail_framebuffers = fail;
    }

    /// Drops every resource as a lost context would.
    pub fn lose_context(&mut self) {
        self.textures.clear();
        self.framebuffers.clear();
        self.pixel_buffers.clear();
    }

    pub fn calls(&self) -> &[ContextCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<ContextCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_pixel_buffers(&self) -> usize {
        self.pixel_buffers.len()
    }

    /// Size of a texture as allocated, including padding.
    pub fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures
            .get(&texture.raw())
            .map(|texture| (texture.width, texture.height))
    }

    /// Reads texture memory directly, bypassing framebuffers and call logging.
    pub fn texture_pixels(&self, texture: TextureHandle, rect: Rect) -> Option<Vec<u8>> {
        let texture = self.textures.get(&texture.raw())?;
        check_bounds(rect, texture.width, texture.height).ok()?;
        Some(copy_out(&texture.pixels, texture.width, rect))
    }

    fn next_raw(&mut self) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        raw
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        pixels: &[u8],
        rect: Rect,
    ) -> Result<(), GraphicsError> {
        check_payload(pixels, rect)?;
        let target = self
            .textures
            .get_mut(&texture.raw())
            .ok_or(GraphicsError::UnknownTexture)?;
        check_bounds(rect, target.width, target.height)?;
        let row_bytes = rect.width as usize * 4;
        for row in 0..rect.height as usize {
            let src = row * row_bytes;
            let dst = ((rect.y as usize + row) * target.width as usize + rect.x as usize) * 4;
            target.pixels[dst..dst + row_bytes].copy_from_slice(&pixels[src..src + row_bytes]);
        }
        Ok(())
    }
}

fn copy_out(pixels: &[u8], stride_px: u32, rect: Rect) -> Vec<u8> {
    let row_bytes = rect.width as usize * 4;
    let mut out = Vec::with_capacity(rect.rgba8_len());
    for row in 0..rect.height as usize {
        let src = ((rect.y as usize + row) * stride_px as usize + rect.x as usize) * 4;
        out.extend_from_slice(&pixels[src..src + row_bytes]);
    }
    out
}

impl GraphicsContext for SoftwareContext {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle, GraphicsError> {
        if self
            .texture_budget
            .is_some_and(|budget| self.textures.len() >= budget)
        {
            return Err(GraphicsError::TextureCreation {
                width,
                height,
                reason: "texture budget exhausted".to_owned(),
            });
        }
        let handle = TextureHandle::new(self.next_raw());
        self.textures.insert(
            handle.raw(),
            SoftTexture {
                width,
                height,
                pixels: vec![0; width as usize * height as usize * 4],
            },
        );
        self.calls.push(ContextCall::CreateTexture(handle));
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.raw());
        self.calls.push(ContextCall::DeleteTexture(texture));
    }

    fn is_texture(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture.raw())
    }

    fn create_framebuffer(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
    ) -> Result<FramebufferHandle, GraphicsError> {
        if self.fail_framebuffers {
            return Err(GraphicsError::FramebufferCreation(
                "framebuffer creation disabled".to_owned(),
            ));
        }
        let Some(target) = self.textures.get(&texture.raw()) else {
            return Err(GraphicsError::UnknownTexture);
        };
        if width > target.width || height > target.height {
            return Err(GraphicsError::FramebufferCreation(format!(
                "{width}x{height} exceeds the {}x{} texture",
                target.width, target.height
            )));
        }
        let handle = FramebufferHandle::new(self.next_raw());
        self.framebuffers.insert(
            handle.raw(),
            SoftFramebuffer::Texture {
                texture,
                width,
                height,
            },
        );
        self.calls.push(ContextCall::CreateFramebuffer(handle));
        Ok(handle)
    }

    fn screen_framebuffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<FramebufferHandle, GraphicsError> {
        if self.fail_framebuffers {
            return Err(GraphicsError::FramebufferCreation(
                "framebuffer creation disabled".to_owned(),
            ));
        }
        let handle = FramebufferHandle::new(self.next_raw());
        self.framebuffers.insert(
            handle.raw(),
            SoftFramebuffer::Screen {
                width,
                height,
                pixels: vec![0; width as usize * height as usize * 4],
            },
        );
        self.calls.push(ContextCall::CreateFramebuffer(handle));
        Ok(handle)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer.raw());
        self.calls.push(ContextCall::DeleteFramebuffer(framebuffer));
    }

    fn set_viewport(&mut self, framebuffer: FramebufferHandle) -> Result<(), GraphicsError> {
        if !self.framebuffers.contains_key(&framebuffer.raw()) {
            return Err(GraphicsError::UnknownFramebuffer);
        }
        self.calls.push(ContextCall::SetViewport(framebuffer));
        Ok(())
    }

    fn tex_sub_image_2d(
        &mut self,
        texture: TextureHandle,
        pixels: &[u8],
        rect: Rect,
    ) -> Result<(), GraphicsError> {
        self.write_texture(texture, pixels, rect)?;
        self.calls.push(ContextCall::Upload { texture, rect });
        Ok(())
    }

    fn framebuffer_pixels(
        &mut self,
        framebuffer: FramebufferHandle,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, GraphicsError> {
        let rect = Rect::from_size(width, height);
        let pixels = match self.framebuffers.get(&framebuffer.raw()) {
            None => return Err(GraphicsError::UnknownFramebuffer),
            Some(SoftFramebuffer::Screen {
                width: screen_width,
                height: screen_height,
                pixels,
            }) => {
                check_bounds(rect, *screen_width, *screen_height)?;
                copy_out(pixels, *screen_width, rect)
            }
            Some(SoftFramebuffer::Texture {
                texture,
                width: fb_width,
                height: fb_height,
            }) => {
                check_bounds(rect, *fb_width, *fb_height)?;
                let texture = self
                    .textures
                    .get(&texture.raw())
                    .ok_or(GraphicsError::UnknownTexture)?;
                copy_out(&texture.pixels, texture.width, rect)
            }
        };
        self.calls.push(ContextCall::ReadPixels(framebuffer));
        Ok(pixels)
    }

    fn flush(&mut self) {
        self.calls.push(ContextCall::Flush);
    }

    fn supports_pixel_buffers(&self) -> bool {
        self.supports_pixel_buffers
    }

    fn create_pixel_buffer(&mut self, size: usize) -> Result<PixelBufferHandle, GraphicsError> {
        if !self.supports_pixel_buffers {
            return Err(GraphicsError::PixelBuffersUnsupported);
        }
        let handle = PixelBufferHandle::new(self.next_raw());
        self.pixel_buffers.insert(
            handle.raw(),
            SoftPixelBuffer {
                bytes: vec![0; size],
                mapped: false,
            },
        );
        self.calls.push(ContextCall::CreatePixelBuffer(handle));
        Ok(handle)
    }

    fn delete_pixel_buffer(&mut self, buffer: PixelBufferHandle) {
        self.pixel_buffers.remove(&buffer.raw());
        self.calls.push(ContextCall::DeletePixelBuffer(buffer));
    }

    fn map_pixel_buffer(&mut self, buffer: PixelBufferHandle) -> Result<&mut [u8], GraphicsError> {
        self.calls.push(ContextCall::MapPixelBuffer(buffer));
        let mapped = self
            .pixel_buffers
            .get_mut(&buffer.raw())
            .ok_or(GraphicsError::UnknownPixelBuffer)?;
        mapped.mapped = true;
        Ok(mapped.bytes.as_mut_slice())
    }

    fn unmap_pixel_buffer(&mut self, buffer: PixelBufferHandle) -> Result<(), GraphicsError> {
        let mapped = self
            .pixel_buffers
            .get_mut(&buffer.raw())
            .ok_or(GraphicsError::UnknownPixelBuffer)?;
        if !mapped.mapped {
            return Err(GraphicsError::NotMapped);
        }
        mapped.mapped = false;
        self.calls.push(ContextCall::UnmapPixelBuffer(buffer));
        Ok(())
    }

    fn tex_sub_image_2d_from_buffer(
        &mut self,
        texture: TextureHandle,
        buffer: PixelBufferHandle,
        offset: usize,
        rect: Rect,
    ) -> Result<(), GraphicsError> {
        let source = self
            .pixel_buffers
            .get(&buffer.raw())
            .ok_or(GraphicsError::UnknownPixelBuffer)?;
        let end = offset + rect.rgba8_len();
        let Some(pixels) = source.bytes.get(offset..end) else {
            return Err(GraphicsError::PayloadLength {
                expected: end,
                actual: source.bytes.len(),
            });
        };
        let pixels = pixels.to_vec();
        self.write_texture(texture, &pixels, rect)?;
        self.calls
            .push(ContextCall::UploadFromBuffer { texture, rect });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_then_read_back_through_framebuffer() {
        let mut context = SoftwareContext::new();
        let texture = context.create_texture(4, 4).unwrap();
        let pixels: Vec<u8> = (0..2 * 2 * 4).collect();
        context
            .tex_sub_image_2d(texture, &pixels, Rect::new(1, 1, 2, 2))
            .unwrap();
        let framebuffer = context.create_framebuffer(texture, 4, 4).unwrap();

        let read = context.framebuffer_pixels(framebuffer, 4, 4).unwrap();
        let row1 = &read[4 * 4..4 * 4 * 2];
        assert_eq!(&row1[4..12], &pixels[0..8]);
        assert_eq!(&read[0..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn rejects_mismatched_payload() {
        let mut context = SoftwareContext::new();
        let texture = context.create_texture(4, 4).unwrap();
        let error = context
            .tex_sub_image_2d(texture, &[0; 3], Rect::new(0, 0, 1, 1))
            .unwrap_err();
        assert_eq!(
            error,
            GraphicsError::PayloadLength {
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn lost_context_forgets_textures() {
        let mut context = SoftwareContext::new();
        let texture = context.create_texture(2, 2).unwrap();
        assert!(context.is_texture(texture));
        context.lose_context();
        assert!(!context.is_texture(texture));
    }

    #[test]
    fn budget_limits_texture_creation() {
        let mut context = SoftwareContext::new();
        context.set_texture_budget(Some(1));
        context.create_texture(2, 2).unwrap();
        assert!(matches!(
            context.create_texture(2, 2),
            Err(GraphicsError::TextureCreation { .. })
        ));
    }
}
