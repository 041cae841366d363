use super::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    rgba.repeat(width as usize * height as usize)
}

fn pixel_at(bytes: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let index = ((y * width + x) * 4) as usize;
    [
        bytes[index],
        bytes[index + 1],
        bytes[index + 2],
        bytes[index + 3],
    ]
}

fn count_calls(calls: &[ContextCall], matches: impl Fn(&ContextCall) -> bool) -> usize {
    calls.iter().filter(|call| matches(call)).count()
}

#[test]
fn new_image_pads_texture_to_power_of_two() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::new());
    let id = driver.new_image(3, 5).expect("new image");

    let image = driver.image(id).expect("live image");
    assert_eq!((image.width(), image.height()), (3, 5));
    let texture = image.texture().expect("texture");
    assert_eq!(driver.context().texture_size(texture), Some((4, 8)));
    assert!(image.framebuffer().is_none());
}

#[test]
fn read_pixels_crops_padding() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::new());
    let id = driver.new_image(3, 3).expect("new image");
    driver.replace_pixels(id, solid(3, 3, [9, 8, 7, 6]), 0, 0, 3, 3);

    let pixels = driver.read_pixels(id).expect("read pixels");
    assert_eq!(pixels, solid(3, 3, [9, 8, 7, 6]));
}

#[test]
fn overlapping_edits_apply_in_submission_order() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::new());
    let id = driver.new_image(4, 4).expect("new image");
    driver.replace_pixels(id, solid(4, 4, [255, 0, 0, 255]), 0, 0, 4, 4);
    driver.replace_pixels(id, solid(2, 2, [0, 0, 255, 255]), 1, 1, 2, 2);
    assert_eq!(driver.image(id).expect("live image").pending_edits(), 2);

    let pixels = driver.read_pixels(id).expect("read pixels");
    assert_eq!(pixel_at(&pixels, 4, 0, 0), [255, 0, 0, 255]);
    assert_eq!(pixel_at(&pixels, 4, 1, 1), [0, 0, 255, 255]);
    assert_eq!(pixel_at(&pixels, 4, 2, 2), [0, 0, 255, 255]);
    assert_eq!(pixel_at(&pixels, 4, 3, 3), [255, 0, 0, 255]);
    assert_eq!(driver.image(id).expect("live image").pending_edits(), 0);
}

#[test]
fn edits_stay_queued_until_bound() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::new());
    let id = driver.new_image(2, 2).expect("new image");
    driver.context_mut().take_calls();

    driver.replace_pixels(id, solid(2, 2, [1, 2, 3, 4]), 0, 0, 2, 2);
    assert!(driver.context().calls().is_empty());

    driver.set_as_source(id).expect("bind source");
    let texture = driver.image(id).and_then(GpuImage::texture).expect("texture");
    assert_eq!(
        driver.context().texture_pixels(texture, Rect::new(0, 0, 2, 2)),
        Some(solid(2, 2, [1, 2, 3, 4]))
    );
    assert_eq!(driver.source(), Some(id));
}

#[test]
fn draw_flag_flushes_before_first_upload() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::new());
    let id = driver.new_image(2, 2).expect("new image");
    driver.context_mut().take_calls();

    driver.record_draw();
    driver.replace_pixels(id, solid(1, 1, [5, 5, 5, 5]), 0, 0, 1, 1);
    driver.set_as_source(id).expect("bind source");

    let calls = driver.context_mut().take_calls();
    let texture = driver.image(id).and_then(GpuImage::texture).expect("texture");
    assert_eq!(
        calls,
        vec![
            ContextCall::Flush,
            ContextCall::Upload {
                texture,
                rect: Rect::new(0, 0, 1, 1),
            },
        ]
    );
    assert!(!driver.draw_pending_flush());
}

#[test]
fn draw_flag_survives_resolution_without_edits() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::new());
    let id = driver.new_image(2, 2).expect("new image");
    driver.context_mut().take_calls();

    driver.record_draw();
    driver.set_as_source(id).expect("bind source");

    assert!(driver.context().calls().is_empty());
    assert!(driver.draw_pending_flush());
}

#[test]
fn pixel_buffer_path_maps_once_per_resolution() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::with_pixel_buffers());
    assert_eq!(driver.transfer_path(), TransferPath::PixelBuffer);
    let id = driver.new_image(4, 4).expect("new image");
    driver.context_mut().take_calls();

    driver.replace_pixels(id, solid(4, 4, [10, 20, 30, 40]), 0, 0, 4, 4);
    driver.replace_pixels(id, solid(1, 2, [50, 60, 70, 80]), 3, 0, 1, 2);
    driver.set_as_source(id).expect("bind source");

    let calls = driver.context_mut().take_calls();
    assert_eq!(
        count_calls(&calls, |call| matches!(call, ContextCall::MapPixelBuffer(_))),
        1
    );
    assert_eq!(
        count_calls(&calls, |call| matches!(call, ContextCall::UnmapPixelBuffer(_))),
        1
    );
    assert_eq!(
        count_calls(&calls, |call| matches!(call, ContextCall::UploadFromBuffer { .. })),
        2
    );
    assert_eq!(
        count_calls(&calls, |call| matches!(call, ContextCall::Upload { .. })),
        0
    );

    let pixels = driver.read_pixels(id).expect("read pixels");
    assert_eq!(pixel_at(&pixels, 4, 0, 0), [10, 20, 30, 40]);
    assert_eq!(pixel_at(&pixels, 4, 3, 1), [50, 60, 70, 80]);
    assert_eq!(pixel_at(&pixels, 4, 3, 2), [10, 20, 30, 40]);
}

#[test]
fn pixel_buffer_path_matches_direct_path() {
    init_logging();
    let edits = [
        (solid(4, 4, [1, 1, 1, 1]), Rect::new(0, 0, 4, 4)),
        (solid(2, 3, [2, 2, 2, 2]), Rect::new(1, 0, 2, 3)),
        (solid(3, 1, [3, 3, 3, 3]), Rect::new(0, 2, 3, 1)),
    ];
    let mut direct = Driver::new(SoftwareContext::new());
    let mut buffered = Driver::new(SoftwareContext::with_pixel_buffers());
    let direct_id = direct.new_image(4, 4).expect("new image");
    let buffered_id = buffered.new_image(4, 4).expect("new image");
    for (pixels, rect) in &edits {
        direct.replace_pixels(direct_id, pixels.clone(), rect.x, rect.y, rect.width, rect.height);
        buffered.replace_pixels(
            buffered_id,
            pixels.clone(),
            rect.x,
            rect.y,
            rect.width,
            rect.height,
        );
    }

    assert_eq!(
        direct.read_pixels(direct_id).expect("direct read"),
        buffered.read_pixels(buffered_id).expect("buffered read")
    );
}

#[test]
fn staging_buffer_grows_only_when_needed() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::with_pixel_buffers());
    let id = driver.new_image(4, 4).expect("new image");

    driver.replace_pixels(id, solid(4, 4, [1, 1, 1, 1]), 0, 0, 4, 4);
    driver.set_as_source(id).expect("bind source");
    driver.replace_pixels(id, solid(2, 2, [2, 2, 2, 2]), 0, 0, 2, 2);
    driver.set_as_source(id).expect("bind source");
    assert_eq!(driver.context().live_pixel_buffers(), 1);

    driver.replace_pixels(id, solid(4, 4, [3, 3, 3, 3]), 0, 0, 4, 4);
    driver.replace_pixels(id, solid(4, 4, [4, 4, 4, 4]), 0, 0, 4, 4);
    driver.set_as_source(id).expect("bind source");
    let calls = driver.context().calls();
    assert_eq!(
        count_calls(calls, |call| matches!(call, ContextCall::CreatePixelBuffer(_))),
        2
    );
    assert_eq!(
        count_calls(calls, |call| matches!(call, ContextCall::DeletePixelBuffer(_))),
        1
    );
    assert_eq!(driver.context().live_pixel_buffers(), 1);
}

#[test]
fn direct_uploads_config_overrides_pixel_buffer_support() {
    let config = DriverConfig::from_toml_str("prefer_pixel_buffers = false").expect("config");
    let driver = Driver::with_config(SoftwareContext::with_pixel_buffers(), config);
    assert_eq!(driver.transfer_path(), TransferPath::Direct);
}

#[test]
fn failed_resolution_clears_the_queue() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::new());
    let id = driver.new_image(2, 2).expect("new image");
    driver.replace_pixels(id, vec![0; 3], 0, 0, 1, 1);

    let error = driver.set_as_source(id).expect_err("short payload");
    assert_eq!(
        error,
        GraphicsError::PayloadLength {
            expected: 4,
            actual: 3
        }
    );
    assert_eq!(driver.image(id).expect("live image").pending_edits(), 0);
    assert_eq!(driver.source(), None);
    driver.set_as_source(id).expect("nothing left to resolve");
}

#[test]
fn ensure_framebuffer_is_idempotent() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::new());
    let id = driver.new_image(5, 5).expect("new image");

    let first = driver.ensure_framebuffer(id).expect("framebuffer");
    let second = driver.ensure_framebuffer(id).expect("framebuffer");
    assert_eq!(first, second);
    assert_eq!(driver.context().live_framebuffers(), 1);
}

#[test]
fn failed_framebuffer_creation_is_retried() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::new());
    let id = driver.new_image(2, 2).expect("new image");

    driver.context_mut().set_fail_framebuffers(true);
    assert!(matches!(
        driver.ensure_framebuffer(id),
        Err(GraphicsError::FramebufferCreation(_))
    ));
    assert!(driver.image(id).expect("live image").framebuffer().is_none());

    driver.context_mut().set_fail_framebuffers(false);
    let framebuffer = driver.ensure_framebuffer(id).expect("framebuffer");
    assert_eq!(
        driver.image(id).expect("live image").framebuffer(),
        Some(framebuffer)
    );
}

#[test]
fn screen_framebuffer_failure_surfaces_and_is_retried() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::new());
    let screen = driver.new_screen_image(16, 9);

    driver.context_mut().set_fail_framebuffers(true);
    assert!(matches!(
        driver.set_as_destination(screen),
        Err(GraphicsError::FramebufferCreation(_))
    ));
    assert!(driver.image(screen).expect("screen").framebuffer().is_none());
    assert_eq!(driver.destination(), None);

    driver.context_mut().set_fail_framebuffers(false);
    driver.set_as_destination(screen).expect("bind screen");
    assert_eq!(driver.destination(), Some(screen));
}

#[test]
fn set_as_destination_binds_viewport() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::new());
    let id = driver.new_image(8, 8).expect("new image");

    driver.set_as_destination(id).expect("bind destination");
    let framebuffer = driver
        .image(id)
        .and_then(GpuImage::framebuffer)
        .expect("framebuffer");
    assert_eq!(
        driver.context().calls().last(),
        Some(&ContextCall::SetViewport(framebuffer))
    );
    assert_eq!(driver.destination(), Some(id));
}

#[test]
fn screen_image_uses_exact_size_and_is_never_invalidated() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::new());
    let screen = driver.new_screen_image(30, 20);
    assert!(driver.image(screen).expect("screen").is_screen());

    driver.set_as_destination(screen).expect("bind screen");
    let pixels = driver.read_pixels(screen).expect("read screen");
    assert_eq!(pixels.len(), 30 * 20 * 4);

    driver.context_mut().lose_context();
    assert!(!driver.is_invalidated(screen));
}

#[test]
#[should_panic(expected = "screen")]
fn replace_pixels_on_screen_panics() {
    let mut driver = Driver::new(SoftwareContext::new());
    let screen = driver.new_screen_image(4, 4);
    driver.replace_pixels(screen, solid(1, 1, [0, 0, 0, 0]), 0, 0, 1, 1);
}

#[test]
#[should_panic(expected = "unknown image id")]
fn replace_pixels_on_disposed_image_panics() {
    let mut driver = Driver::new(SoftwareContext::new());
    let id = driver.new_image(4, 4).expect("new image");
    driver.dispose(id);
    driver.replace_pixels(id, solid(1, 1, [0, 0, 0, 0]), 0, 0, 1, 1);
}

#[test]
fn lost_context_invalidates_images() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::new());
    let id = driver.new_image(4, 4).expect("new image");
    assert!(!driver.is_invalidated(id));

    driver.context_mut().lose_context();
    assert!(driver.is_invalidated(id));
}

#[test]
fn texture_budget_failure_surfaces_from_new_image() {
    init_logging();
    let mut context = SoftwareContext::new();
    context.set_texture_budget(Some(1));
    let mut driver = Driver::new(context);

    driver.new_image(4, 4).expect("first image");
    assert!(matches!(
        driver.new_image(4, 4),
        Err(GraphicsError::TextureCreation { .. })
    ));
    assert_eq!(driver.live_images(), 1);
}

#[test]
fn dispose_releases_buffer_then_framebuffer_then_texture() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::with_pixel_buffers());
    let id = driver.new_image(4, 4).expect("new image");
    driver.replace_pixels(id, solid(4, 4, [1, 2, 3, 4]), 0, 0, 4, 4);
    driver.read_pixels(id).expect("read pixels");

    let image = driver.image(id).expect("live image");
    let texture = image.texture().expect("texture");
    let framebuffer = image.framebuffer().expect("framebuffer");
    let buffer = driver
        .context()
        .calls()
        .iter()
        .find_map(|call| match call {
            ContextCall::CreatePixelBuffer(buffer) => Some(*buffer),
            _ => None,
        })
        .expect("staging buffer");
    driver.context_mut().take_calls();

    driver.dispose(id);
    assert_eq!(
        driver.context_mut().take_calls(),
        vec![
            ContextCall::DeletePixelBuffer(buffer),
            ContextCall::DeleteFramebuffer(framebuffer),
            ContextCall::DeleteTexture(texture),
        ]
    );

    driver.dispose(id);
    assert!(driver.context().calls().is_empty());
    assert!(!driver.contains(id));
    assert_eq!(driver.context().live_textures(), 0);
}

#[test]
fn dispose_clears_bindings() {
    init_logging();
    let mut driver = Driver::new(SoftwareContext::new());
    let id = driver.new_image(2, 2).expect("new image");
    driver.set_as_source(id).expect("bind source");
    driver.set_as_destination(id).expect("bind destination");

    driver.dispose(id);
    assert_eq!(driver.source(), None);
    assert_eq!(driver.destination(), None);
}

#[test]
fn into_context_releases_every_image() {
    let mut driver = Driver::new(SoftwareContext::new());
    driver.new_image(2, 2).expect("new image");
    let id = driver.new_image(8, 8).expect("new image");
    driver.ensure_framebuffer(id).expect("framebuffer");

    let context = driver.into_context();
    assert_eq!(context.live_textures(), 0);
    assert_eq!(context.live_framebuffers(), 0);
}
