//! [`GraphicsContext`] over a wgpu device and queue.
//!
//! Uploads go through `Queue::write_texture`, which already stages data, so
//! this context does not offer pixel buffers and the driver selects the
//! direct path. The output surface belongs to the presentation layer; its
//! framebuffer can be bound as a viewport but not read back here.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use atlas::Rect;

use crate::context::{
    FramebufferHandle, GraphicsContext, GraphicsError, TextureHandle, check_bounds, check_payload,
};

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[derive(Debug)]
struct WgpuTexture {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
}

#[derive(Debug)]
enum WgpuFramebuffer {
    Texture {
        texture: TextureHandle,
        view: wgpu::TextureView,
        width: u32,
        height: u32,
    },
    Screen {
        width: u32,
        height: u32,
    },
}

#[derive(Debug)]
pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    device_lost: Arc<AtomicBool>,
    next_handle: u64,
    textures: HashMap<u64, WgpuTexture>,
    framebuffers: HashMap<u64, WgpuFramebuffer>,
    viewport: Option<(FramebufferHandle, u32, u32)>,
}

impl WgpuContext {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let device_lost = Arc::new(AtomicBool::new(false));
        let lost_flag = Arc::clone(&device_lost);
        device.set_device_lost_callback(move |reason, message| {
            log::warn!("[images] wgpu device lost ({reason:?}): {message}");
            lost_flag.store(true, Ordering::Release);
        });
        Self {
            device,
            queue,
            device_lost,
            next_handle: 1,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            viewport: None,
        }
    }

    /// Requests an adapter and device without a surface.
    pub fn request_headless() -> Result<Self, GraphicsError> {
        let (device, queue) = pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .map_err(|error| GraphicsError::DeviceUnavailable(error.to_string()))?;
            let limits = adapter.limits();
            adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("images.device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits,
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await
                .map_err(|error| GraphicsError::DeviceUnavailable(error.to_string()))
        })?;
        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The texture behind `handle`, for binding in draw passes.
    pub fn texture(&self, handle: TextureHandle) -> Option<&wgpu::Texture> {
        self.textures.get(&handle.raw()).map(|texture| &texture.texture)
    }

    /// The framebuffer last passed to `set_viewport`, with its size.
    pub fn viewport(&self) -> Option<(FramebufferHandle, u32, u32)> {
        self.viewport
    }

    fn next_raw(&mut self) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        raw
    }

    fn texture_entry(&self, handle: TextureHandle) -> Result<&WgpuTexture, GraphicsError> {
        if self.device_lost.load(Ordering::Acquire) {
            return Err(GraphicsError::DeviceLost);
        }
        self.textures
            .get(&handle.raw())
            .ok_or(GraphicsError::UnknownTexture)
    }
}

impl GraphicsContext for WgpuContext {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle, GraphicsError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(GraphicsError::TextureCreation {
                width,
                height,
                reason: format!("dimensions must be within 1..={max}"),
            });
        }

        let error_scope = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("images.texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        if let Some(error) = pollster::block_on(error_scope.pop()) {
            return Err(GraphicsError::TextureCreation {
                width,
                height,
                reason: error.to_string(),
            });
        }

        let handle = TextureHandle::new(self.next_raw());
        self.textures.insert(
            handle.raw(),
            WgpuTexture {
                texture,
                width,
                height,
            },
        );
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if let Some(entry) = self.textures.remove(&texture.raw()) {
            entry.texture.destroy();
        }
    }

    fn is_texture(&self, texture: TextureHandle) -> bool {
        !self.device_lost.load(Ordering::Acquire) && self.textures.contains_key(&texture.raw())
    }

    fn create_framebuffer(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
    ) -> Result<FramebufferHandle, GraphicsError> {
        let entry = self.texture_entry(texture)?;
        if width > entry.width || height > entry.height {
            return Err(GraphicsError::FramebufferCreation(format!(
                "{width}x{height} exceeds the {}x{} texture",
                entry.width, entry.height
            )));
        }
        let view = entry.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("images.framebuffer.view"),
            ..Default::default()
        });
        let handle = FramebufferHandle::new(self.next_raw());
        self.framebuffers.insert(
            handle.raw(),
            WgpuFramebuffer::Texture {
                texture,
                view,
                width,
                height,
            },
        );
        Ok(handle)
    }

    fn screen_framebuffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<FramebufferHandle, GraphicsError> {
        if self.device_lost.load(Ordering::Acquire) {
            return Err(GraphicsError::DeviceLost);
        }
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(GraphicsError::FramebufferCreation(format!(
                "surface {width}x{height} must be within 1..={max}"
            )));
        }
        let handle = FramebufferHandle::new(self.next_raw());
        self.framebuffers
            .insert(handle.raw(), WgpuFramebuffer::Screen { width, height });
        Ok(handle)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer.raw());
        if self
            .viewport
            .is_some_and(|(current, _, _)| current == framebuffer)
        {
            self.viewport = None;
        }
    }

    fn set_viewport(&mut self, framebuffer: FramebufferHandle) -> Result<(), GraphicsError> {
        let (width, height) = match self.framebuffers.get(&framebuffer.raw()) {
            Some(WgpuFramebuffer::Texture { width, height, .. })
            | Some(WgpuFramebuffer::Screen { width, height }) => (*width, *height),
            None => return Err(GraphicsError::UnknownFramebuffer),
        };
        self.viewport = Some((framebuffer, width, height));
        Ok(())
    }

    fn tex_sub_image_2d(
        &mut self,
        texture: TextureHandle,
        pixels: &[u8],
        rect: Rect,
    ) -> Result<(), GraphicsError> {
        check_payload(pixels, rect)?;
        let entry = self.texture_entry(texture)?;
        check_bounds(rect, entry.width, entry.height)?;
        if rect.is_empty() {
            return Ok(());
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: rect.x,
                    y: rect.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(rect.width * 4),
                rows_per_image: Some(rect.height),
            },
            wgpu::Extent3d {
                width: rect.width,
                height: rect.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn framebuffer_pixels(
        &mut self,
        framebuffer: FramebufferHandle,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, GraphicsError> {
        let texture_handle = match self.framebuffers.get(&framebuffer.raw()) {
            Some(WgpuFramebuffer::Texture {
                texture,
                width: fb_width,
                height: fb_height,
                ..
            }) => {
                check_bounds(Rect::from_size(width, height), *fb_width, *fb_height)?;
                *texture
            }
            Some(WgpuFramebuffer::Screen { .. }) => {
                return Err(GraphicsError::ReadBack(
                    "the output surface is owned by the presentation layer".to_owned(),
                ));
            }
            None => return Err(GraphicsError::UnknownFramebuffer),
        };
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let entry = self.texture_entry(texture_handle)?;

        let unpadded_bytes_per_row = width * 4;
        let padded_bytes_per_row = unpadded_bytes_per_row
            .div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("images.readback"),
            size: padded_bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("images.readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|error| GraphicsError::ReadBack(error.to_string()))?;
        receiver
            .recv()
            .map_err(|error| GraphicsError::ReadBack(error.to_string()))?
            .map_err(|error| GraphicsError::ReadBack(error.to_string()))?;

        let mut pixels = Vec::with_capacity(unpadded_bytes_per_row as usize * height as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks_exact(padded_bytes_per_row as usize) {
                pixels.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
            }
        }
        buffer.unmap();
        Ok(pixels)
    }

    fn flush(&mut self) {
        self.queue.submit(std::iter::empty::<wgpu::CommandBuffer>());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headless_or_skip() -> Option<WgpuContext> {
        match WgpuContext::request_headless() {
            Ok(context) => Some(context),
            Err(error) => {
                eprintln!("skipping wgpu test: {error}");
                None
            }
        }
    }

    #[test]
    fn write_texture_is_visible_to_read_back() {
        let Some(mut context) = headless_or_skip() else {
            return;
        };
        let texture = context.create_texture(64, 64).expect("create texture");
        let pixels: Vec<u8> = (0..8 * 8 * 4).map(|value| (value % 251) as u8).collect();
        context
            .tex_sub_image_2d(texture, &pixels, Rect::new(0, 0, 8, 8))
            .expect("upload");
        let framebuffer = context
            .create_framebuffer(texture, 64, 64)
            .expect("create framebuffer");

        let read = context
            .framebuffer_pixels(framebuffer, 8, 8)
            .expect("read back");
        assert_eq!(read, pixels);
    }

    #[test]
    fn deleted_texture_is_not_a_texture() {
        let Some(mut context) = headless_or_skip() else {
            return;
        };
        let texture = context.create_texture(4, 4).expect("create texture");
        assert!(context.is_texture(texture));
        context.delete_texture(texture);
        assert!(!context.is_texture(texture));
    }
}
