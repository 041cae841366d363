use std::sync::{Mutex, MutexGuard};

use atlas::{AtlasError, Backend, BackendId, BackendLayout, Rect, RegionKey};
use images::{Driver, GpuImage, GraphicsContext, GraphicsError, ImageId, check_payload};
use slotmap::SlotMap;

use crate::deferred::{DeferredOp, DeferredQueue};
use crate::policy::{PolicyError, SharingPolicy};

slotmap::new_key_type! {
    pub struct LogicalImageId;
}

#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error(transparent)]
    Graphics(#[from] GraphicsError),
    #[error(transparent)]
    Atlas(#[from] AtlasError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("edit {rect:?} lies outside the {width}x{height} image")]
    EditOutOfBounds { rect: Rect, width: u32, height: u32 },
    #[error("all {max} shared backend ids are in use")]
    BackendIdsExhausted { max: u32 },
}

/// Where a logical image's pixels live: the GPU image to bind and the
/// rectangle inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundRegion {
    pub image: ImageId,
    pub region: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Shared {
        key: RegionKey,
        rect: Rect,
        backend: ImageId,
    },
    Standalone {
        image: ImageId,
    },
    Screen {
        image: ImageId,
    },
}

#[derive(Debug, Clone, Copy)]
struct LogicalImage {
    width: u32,
    height: u32,
    placement: Placement,
    // never placed in a shared backend again
    pinned: bool,
}

impl LogicalImage {
    fn bound(&self) -> BoundRegion {
        match self.placement {
            Placement::Shared { rect, backend, .. } => BoundRegion {
                image: backend,
                region: rect,
            },
            Placement::Standalone { image } | Placement::Screen { image } => BoundRegion {
                image,
                region: Rect::from_size(self.width, self.height),
            },
        }
    }

    fn is_screen(&self) -> bool {
        matches!(self.placement, Placement::Screen { .. })
    }

    fn is_share_candidate(&self, policy: &SharingPolicy) -> bool {
        matches!(self.placement, Placement::Standalone { .. })
            && !self.pinned
            && policy.fits_shared(self.width, self.height)
    }
}

#[derive(Debug)]
struct SharedBackend {
    allocator: Backend,
    image: ImageId,
}

#[derive(Debug, Default)]
struct ManagerState {
    // creation order; first fit walks it front to back
    backends: Vec<SharedBackend>,
    next_backend_id: u32,
    // ids of reclaimed backends, handed out before fresh ones
    free_backend_ids: Vec<u16>,
    images: SlotMap<LogicalImageId, LogicalImage>,
}

impl ManagerState {
    fn population(&self) -> usize {
        self.images
            .values()
            .filter(|image| !image.is_screen())
            .count()
    }

    fn try_alloc(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<Option<(RegionKey, Rect, ImageId)>, AtlasError> {
        for backend in &mut self.backends {
            match backend.allocator.alloc(width, height) {
                Ok((key, rect)) => return Ok(Some((key, rect, backend.image))),
                Err(AtlasError::OutOfSpace) => continue,
                Err(error) => return Err(error),
            }
        }
        Ok(None)
    }

    fn next_backend_id(&mut self) -> Result<BackendId, ShareError> {
        if let Some(raw) = self.free_backend_ids.pop() {
            return Ok(BackendId::new(raw));
        }
        let raw = self.next_backend_id;
        let max = u32::from(u16::MAX) + 1;
        if raw >= max {
            return Err(ShareError::BackendIdsExhausted { max });
        }
        self.next_backend_id += 1;
        Ok(BackendId::new(raw as u16))
    }

    fn release_backend_id(&mut self, id: BackendId) {
        self.free_backend_ids.push(id.raw());
    }

    fn free_region(&mut self, key: RegionKey) -> Result<Rect, AtlasError> {
        let backend = self
            .backends
            .iter_mut()
            .find(|backend| backend.allocator.backend_id() == key.backend())
            .ok_or(AtlasError::WrongBackend)?;
        backend.allocator.free(key)
    }
}

/// Packs small logical images into shared backend textures and keeps the
/// rest in standalone textures.
///
/// Bookkeeping sits behind one mutex that is never held across a driver
/// call. Operations that touch the GPU take the [`Driver`] explicitly;
/// [`dispose_deferred`](Self::dispose_deferred) and the `request_*` methods
/// only record work and can be called from any thread.
#[derive(Debug)]
pub struct SharedBackendManager {
    policy: SharingPolicy,
    state: Mutex<ManagerState>,
    deferred: DeferredQueue<DeferredOp>,
}

impl SharedBackendManager {
    pub fn new(policy: SharingPolicy) -> Result<Self, ShareError> {
        policy.validate()?;
        Ok(Self {
            policy,
            state: Mutex::new(ManagerState::default()),
            deferred: DeferredQueue::new(),
        })
    }

    pub fn policy(&self) -> &SharingPolicy {
        &self.policy
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state
            .lock()
            .expect("shared backend manager lock poisoned")
    }

    /// Creates a logical image, packed into a shared backend when the policy
    /// allows it. Freshly handed out regions are cleared to zero.
    pub fn new_image<C: GraphicsContext>(
        &self,
        driver: &mut Driver<C>,
        width: u32,
        height: u32,
    ) -> Result<LogicalImageId, ShareError> {
        let share = self.policy.fits_shared(width, height)
            && self.state().population() >= self.policy.population_threshold;
        if !share {
            return self.new_standalone(driver, width, height, false);
        }

        let (key, rect, backend) = self.place_shared(driver, width, height)?;
        driver.replace_pixels(
            backend,
            vec![0; rect.rgba8_len()],
            rect.x,
            rect.y,
            rect.width,
            rect.height,
        );
        Ok(self.state().images.insert(LogicalImage {
            width,
            height,
            placement: Placement::Shared { key, rect, backend },
            pinned: false,
        }))
    }

    /// Creates a standalone image that is never moved into a shared backend.
    pub fn new_unshareable_image<C: GraphicsContext>(
        &self,
        driver: &mut Driver<C>,
        width: u32,
        height: u32,
    ) -> Result<LogicalImageId, ShareError> {
        self.new_standalone(driver, width, height, true)
    }

    /// Logical image over the output surface. It is never shared and does
    /// not count towards the population.
    pub fn new_screen_image<C: GraphicsContext>(
        &self,
        driver: &mut Driver<C>,
        width: u32,
        height: u32,
    ) -> LogicalImageId {
        let image = driver.new_screen_image(width, height);
        self.state().images.insert(LogicalImage {
            width,
            height,
            placement: Placement::Screen { image },
            pinned: true,
        })
    }

    fn new_standalone<C: GraphicsContext>(
        &self,
        driver: &mut Driver<C>,
        width: u32,
        height: u32,
        pinned: bool,
    ) -> Result<LogicalImageId, ShareError> {
        let image = driver.new_image(width, height)?;
        Ok(self.state().images.insert(LogicalImage {
            width,
            height,
            placement: Placement::Standalone { image },
            pinned,
        }))
    }

    /// Finds room for a `width`x`height` region: first fit over existing
    /// backends, then growing one of them, then a new backend.
    fn place_shared<C: GraphicsContext>(
        &self,
        driver: &mut Driver<C>,
        width: u32,
        height: u32,
    ) -> Result<(RegionKey, Rect, ImageId), ShareError> {
        let existing = self.state().try_alloc(width, height)?;
        if let Some(found) = existing {
            return Ok(found);
        }
        if let Some(found) = self.grow_for(driver, width, height)? {
            return Ok(found);
        }

        let backend_id = self.state().next_backend_id()?;
        let edge = self.policy.initial_backend_size(width, height);
        let created = BackendLayout::new(edge, self.policy.cell_size)
            .map_err(ShareError::from)
            .and_then(|layout| Ok((layout, driver.new_image(edge, edge)?)));
        let (layout, image) = match created {
            Ok(created) => created,
            Err(error) => {
                self.state().release_backend_id(backend_id);
                return Err(error);
            }
        };
        let mut allocator = Backend::new(layout, backend_id);
        let (key, rect) = match allocator.alloc(width, height) {
            Ok(placed) => placed,
            Err(error) => {
                driver.dispose(image);
                self.state().release_backend_id(backend_id);
                return Err(error.into());
            }
        };
        log::debug!(
            "[shareable] created shared backend {} ({edge}x{edge}) for a {width}x{height} image",
            backend_id.raw()
        );
        self.state()
            .backends
            .push(SharedBackend { allocator, image });
        Ok((key, rect, image))
    }

    /// Doubles the first backend that can hold the region within the
    /// policy's max backend size, copying its pixels into a new texture.
    fn grow_for<C: GraphicsContext>(
        &self,
        driver: &mut Driver<C>,
        width: u32,
        height: u32,
    ) -> Result<Option<(RegionKey, Rect, ImageId)>, ShareError> {
        let plan = {
            let state = self.state();
            state.backends.iter().find_map(|backend| {
                let old_edge = backend.allocator.layout().edge_px();
                let mut edge = old_edge;
                while edge < self.policy.max_backend_size {
                    edge *= 2;
                    let mut grown = backend.allocator.grown(edge).ok()?;
                    if let Ok(placed) = grown.alloc(width, height) {
                        return Some((backend.image, old_edge, grown, placed));
                    }
                }
                None
            })
        };
        let Some((old_image, old_edge, grown, (key, rect))) = plan else {
            return Ok(None);
        };

        let edge = grown.layout().edge_px();
        let pixels = driver.read_pixels(old_image)?;
        let image = driver.new_image(edge, edge)?;
        driver.replace_pixels(image, pixels, 0, 0, old_edge, old_edge);

        let committed = {
            let mut guard = self.state();
            let state = &mut *guard;
            let backend_id = grown.backend_id();
            match state
                .backends
                .iter_mut()
                .find(|backend| backend.allocator.backend_id() == backend_id)
            {
                Some(backend) => {
                    backend.allocator = grown;
                    backend.image = image;
                    for entry in state.images.values_mut() {
                        match &mut entry.placement {
                            Placement::Shared { backend: owner, .. } if *owner == old_image => {
                                *owner = image;
                            }
                            _ => {}
                        }
                    }
                    true
                }
                None => false,
            }
        };
        if !committed {
            driver.dispose(image);
            return Ok(None);
        }
        driver.dispose(old_image);
        log::debug!(
            "[shareable] grew shared backend {} from {old_edge}x{old_edge} to {edge}x{edge}",
            key.backend().raw()
        );
        Ok(Some((key, rect, image)))
    }

    /// Reads a shared backend and cuts `rect` out of it.
    fn read_shared<C: GraphicsContext>(
        driver: &mut Driver<C>,
        backend: ImageId,
        rect: Rect,
    ) -> Result<Vec<u8>, ShareError> {
        let pixels = driver.read_pixels(backend)?;
        let stride = driver
            .image(backend)
            .map(GpuImage::width)
            .ok_or(GraphicsError::UnknownTexture)?;
        Ok(crop(&pixels, stride, rect))
    }

    fn snapshot(&self, id: LogicalImageId, operation: &str) -> LogicalImage {
        let image = self.state().images.get(id).copied();
        match image {
            Some(image) => image,
            None => panic!("shareable: {operation} called with an unknown image id"),
        }
    }

    /// Moves a shared image into its own texture and pins it there.
    /// Images that are already standalone are only pinned.
    pub fn ensure_not_shared<C: GraphicsContext>(
        &self,
        driver: &mut Driver<C>,
        id: LogicalImageId,
    ) -> Result<(), ShareError> {
        let image = self.snapshot(id, "ensure_not_shared");
        let Placement::Shared { key, rect, backend } = image.placement else {
            if let Some(entry) = self.state().images.get_mut(id) {
                entry.pinned = true;
            }
            return Ok(());
        };

        let pixels = Self::read_shared(driver, backend, rect)?;
        let standalone = driver.new_image(image.width, image.height)?;
        driver.replace_pixels(standalone, pixels, 0, 0, image.width, image.height);

        let mut state = self.state();
        if let Some(entry) = state.images.get_mut(id) {
            entry.placement = Placement::Standalone { image: standalone };
            entry.pinned = true;
        }
        state.free_region(key)?;
        log::debug!(
            "[shareable] moved a {}x{} image out of shared region {key}",
            image.width,
            image.height
        );
        Ok(())
    }

    pub fn is_shared(&self, id: LogicalImageId) -> bool {
        self.state()
            .images
            .get(id)
            .is_some_and(|image| matches!(image.placement, Placement::Shared { .. }))
    }

    /// Migrates every eligible standalone image into shared backends once the
    /// population has reached the threshold. Returns how many moved.
    pub fn make_images_shared<C: GraphicsContext>(
        &self,
        driver: &mut Driver<C>,
    ) -> Result<usize, ShareError> {
        let candidates: Vec<LogicalImageId> = {
            let state = self.state();
            if state.population() < self.policy.population_threshold {
                return Ok(0);
            }
            state
                .images
                .iter()
                .filter(|(_, image)| image.is_share_candidate(&self.policy))
                .map(|(id, _)| id)
                .collect()
        };

        let mut migrated = 0;
        for id in candidates {
            if self.share_one(driver, id)? {
                migrated += 1;
            }
        }
        if migrated > 0 {
            log::debug!("[shareable] moved {migrated} images into shared backends");
        }
        Ok(migrated)
    }

    fn share_one<C: GraphicsContext>(
        &self,
        driver: &mut Driver<C>,
        id: LogicalImageId,
    ) -> Result<bool, ShareError> {
        let image = self.state().images.get(id).copied();
        let Some(image) = image else {
            return Ok(false);
        };
        let Placement::Standalone { image: standalone } = image.placement else {
            return Ok(false);
        };
        if !image.is_share_candidate(&self.policy) {
            return Ok(false);
        }

        let pixels = driver.read_pixels(standalone)?;
        let (key, rect, backend) = self.place_shared(driver, image.width, image.height)?;
        driver.replace_pixels(backend, pixels, rect.x, rect.y, rect.width, rect.height);
        if let Some(entry) = self.state().images.get_mut(id) {
            entry.placement = Placement::Shared { key, rect, backend };
        }
        driver.dispose(standalone);
        Ok(true)
    }

    /// Queues disposal for the next [`resolve_deferred`](Self::resolve_deferred).
    pub fn dispose_deferred(&self, id: LogicalImageId) {
        self.deferred.enqueue(DeferredOp::Dispose(id));
    }

    pub fn request_make_shared(&self, id: LogicalImageId) {
        self.deferred.enqueue(DeferredOp::MakeShared(id));
    }

    pub fn request_ensure_not_shared(&self, id: LogicalImageId) {
        self.deferred.enqueue(DeferredOp::EnsureNotShared(id));
    }

    /// Applies queued operations in submission order, then releases shared
    /// backends left without regions.
    ///
    /// The queue is emptied even when an operation fails; the first error
    /// stops the remaining operations and is returned after reclamation.
    pub fn resolve_deferred<C: GraphicsContext>(
        &self,
        driver: &mut Driver<C>,
    ) -> Result<(), ShareError> {
        let operations = self.deferred.drain();
        let result = operations
            .into_iter()
            .try_for_each(|operation| self.apply_deferred(driver, operation));
        if let Err(error) = &result {
            log::warn!("[shareable] deferred resolution stopped: {error}");
        }
        self.reclaim_empty_backends(driver);
        result
    }

    fn apply_deferred<C: GraphicsContext>(
        &self,
        driver: &mut Driver<C>,
        operation: DeferredOp,
    ) -> Result<(), ShareError> {
        match operation {
            DeferredOp::Dispose(id) => self.dispose(driver, id),
            DeferredOp::MakeShared(id) => {
                if self.population() >= self.policy.population_threshold {
                    self.share_one(driver, id)?;
                }
            }
            DeferredOp::EnsureNotShared(id) => {
                if self.contains(id) {
                    self.ensure_not_shared(driver, id)?;
                }
            }
        }
        Ok(())
    }

    fn reclaim_empty_backends<C: GraphicsContext>(&self, driver: &mut Driver<C>) {
        let reclaimed: Vec<SharedBackend> = {
            let mut state = self.state();
            let (empty, live): (Vec<SharedBackend>, _) = std::mem::take(&mut state.backends)
                .into_iter()
                .partition(|backend| backend.allocator.is_empty());
            state.backends = live;
            for backend in &empty {
                state.release_backend_id(backend.allocator.backend_id());
            }
            empty
        };
        for backend in reclaimed {
            log::debug!(
                "[shareable] reclaimed empty backend {}",
                backend.allocator.backend_id().raw()
            );
            driver.dispose(backend.image);
        }
    }

    /// Releases the image now. Shared backends left empty are reclaimed at
    /// the next [`resolve_deferred`](Self::resolve_deferred). Unknown ids are
    /// ignored, so disposing twice is a no-op.
    pub fn dispose<C: GraphicsContext>(&self, driver: &mut Driver<C>, id: LogicalImageId) {
        let image = self.state().images.remove(id);
        let Some(image) = image else {
            return;
        };
        match image.placement {
            Placement::Shared { key, .. } => {
                if let Err(error) = self.state().free_region(key) {
                    log::warn!("[shareable] could not free shared region {key}: {error}");
                }
            }
            Placement::Standalone { image } | Placement::Screen { image } => driver.dispose(image),
        }
    }

    /// Queues a pixel replacement in the image's own coordinates.
    ///
    /// # Panics
    ///
    /// Panics when `id` is unknown or names the output surface.
    #[allow(clippy::too_many_arguments)]
    pub fn replace_pixels<C: GraphicsContext>(
        &self,
        driver: &mut Driver<C>,
        id: LogicalImageId,
        pixels: Vec<u8>,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<(), ShareError> {
        let image = self.snapshot(id, "replace_pixels");
        let bound = image.bound();
        let rect = Rect::new(x, y, width, height);
        if !image.is_screen() {
            if !rect.contained_in(image.width, image.height) {
                return Err(ShareError::EditOutOfBounds {
                    rect,
                    width: image.width,
                    height: image.height,
                });
            }
            // rejected before it is queued on a texture other images share
            check_payload(&pixels, rect)?;
        }
        let target = rect.offset_by(bound.region);
        driver.replace_pixels(
            bound.image,
            pixels,
            target.x,
            target.y,
            target.width,
            target.height,
        );
        Ok(())
    }

    /// Reads the image's pixels, cropped out of its backend when shared.
    pub fn read_pixels<C: GraphicsContext>(
        &self,
        driver: &mut Driver<C>,
        id: LogicalImageId,
    ) -> Result<Vec<u8>, ShareError> {
        let image = self.snapshot(id, "read_pixels");
        match image.placement {
            Placement::Shared { rect, backend, .. } => Self::read_shared(driver, backend, rect),
            Placement::Standalone { image } | Placement::Screen { image } => {
                Ok(driver.read_pixels(image)?)
            }
        }
    }

    pub fn set_as_source<C: GraphicsContext>(
        &self,
        driver: &mut Driver<C>,
        id: LogicalImageId,
    ) -> Result<BoundRegion, ShareError> {
        let bound = self.snapshot(id, "set_as_source").bound();
        driver.set_as_source(bound.image)?;
        Ok(bound)
    }

    pub fn set_as_destination<C: GraphicsContext>(
        &self,
        driver: &mut Driver<C>,
        id: LogicalImageId,
    ) -> Result<BoundRegion, ShareError> {
        let bound = self.snapshot(id, "set_as_destination").bound();
        driver.set_as_destination(bound.image)?;
        Ok(bound)
    }

    pub fn region_of(&self, id: LogicalImageId) -> Option<BoundRegion> {
        self.state().images.get(id).map(LogicalImage::bound)
    }

    pub fn contains(&self, id: LogicalImageId) -> bool {
        self.state().images.contains_key(id)
    }

    pub fn is_pinned(&self, id: LogicalImageId) -> bool {
        self.state().images.get(id).is_some_and(|image| image.pinned)
    }

    pub fn backend_count(&self) -> usize {
        self.state().backends.len()
    }

    /// Live logical images, excluding the output surface.
    pub fn population(&self) -> usize {
        self.state().population()
    }
}

fn crop(pixels: &[u8], stride_px: u32, rect: Rect) -> Vec<u8> {
    let row_bytes = rect.width as usize * 4;
    let mut out = Vec::with_capacity(rect.rgba8_len());
    for row in 0..rect.height as usize {
        let start = ((rect.y as usize + row) * stride_px as usize + rect.x as usize) * 4;
        out.extend_from_slice(&pixels[start..start + row_bytes]);
    }
    out
}
