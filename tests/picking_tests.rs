//! Object picking tests.
//!
//! Pickable rectangles are rasterized into the software picking target by
//! the listener; the coordinator restricts the pass to the texel under the
//! cursor and reads it back on request.

mod common;

use glam::Vec2;
use rstest::rstest;

use common::{context_with, input_at, rect, take_events, RecordingListener};
use multipass_renderer::backend::{DummyEvent, PresentOutcome};
use multipass_renderer::picking::NO_OBJECT;
use multipass_renderer::{FrameOutcome, ImageIndex, PassKind, RendererError, ViewportBounds};

// ============================================================================
// Read-back Tests
// ============================================================================

/// The identifier drawn under the cursor is read back intact, including
/// identifiers that need both channels.
#[rstest]
#[case::small(1)]
#[case::lower_half(0xABCD_1234)]
#[case::upper_half(0xABCD_1234_0000_0000)]
#[case::both_halves(0x0123_4567_89AB_CDEF)]
#[case::max(u64::MAX)]
fn test_pick_returns_id_under_cursor(#[case] id: u64) {
    let mut context = context_with(800, 600, 3, &[PassKind::Picking]);
    let mut listener = RecordingListener::default().with_pickable(rect(100, 100, 50, 50), id);
    let cursor = Vec2::new(120.0, 130.0);

    context
        .on_update(&mut listener, &input_at(800, 600, cursor))
        .unwrap();

    assert_eq!(context.pick(cursor).unwrap(), id);
    assert!(take_events(&mut context).contains(&DummyEvent::PickingRead {
        image: ImageIndex::new(0),
        x: 120,
        y: 130
    }));
}

/// Nothing under the cursor reads as no object.
#[rstest]
fn test_pick_empty_background() {
    let mut context = context_with(800, 600, 3, &[PassKind::Picking]);
    let mut listener =
        RecordingListener::default().with_pickable(rect(100, 100, 50, 50), 0xABCD_1234);
    let cursor = Vec2::new(400.0, 300.0);

    context
        .on_update(&mut listener, &input_at(800, 600, cursor))
        .unwrap();

    assert_eq!(context.pick(cursor).unwrap(), NO_OBJECT);
}

/// The picking pass only touches the texel under the cursor.
#[rstest]
fn test_picking_pass_is_single_texel() {
    let mut context = context_with(800, 600, 3, &[PassKind::Picking]);
    let mut listener = RecordingListener::default().with_pickable(rect(0, 0, 800, 600), 7);

    context
        .on_update(&mut listener, &input_at(800, 600, Vec2::new(10.0, 10.0)))
        .unwrap();

    let scissor = take_events(&mut context)
        .into_iter()
        .find_map(|event| match event {
            DummyEvent::PassBegun {
                pass: PassKind::Picking,
                scissor,
                ..
            } => Some(scissor),
            _ => None,
        })
        .unwrap();
    assert_eq!(scissor, rect(10, 10, 1, 1));

    assert_eq!(context.read_image_pixels(10, 10).unwrap(), 7);
    assert_eq!(context.read_image_pixels(11, 10).unwrap(), NO_OBJECT);
    assert_eq!(context.read_image_pixels(10, 11).unwrap(), NO_OBJECT);
}

/// A cursor outside the surface is clamped onto its edge.
#[rstest]
#[case::left(Vec2::new(-20.0, 300.0), rect(0, 300, 1, 1))]
#[case::bottom_right(Vec2::new(900.0, 700.0), rect(799, 599, 1, 1))]
fn test_picking_scissor_clamped(#[case] cursor: Vec2, #[case] expected: ash::vk::Rect2D) {
    let mut context = context_with(800, 600, 3, &[PassKind::Picking]);
    let mut listener = RecordingListener::default();

    context
        .on_update(&mut listener, &input_at(800, 600, cursor))
        .unwrap();

    let scissor = take_events(&mut context)
        .into_iter()
        .find_map(|event| match event {
            DummyEvent::PassBegun {
                pass: PassKind::Picking,
                scissor,
                ..
            } => Some(scissor),
            _ => None,
        });
    assert_eq!(scissor, Some(expected));
}

/// Picks read the frame that was rendered last.
#[rstest]
fn test_pick_follows_latest_frame() {
    let mut context = context_with(800, 600, 3, &[PassKind::Picking]);
    let cursor = Vec2::new(50.0, 50.0);
    let mut listener = RecordingListener::default().with_pickable(rect(0, 0, 100, 100), 1);

    context
        .on_update(&mut listener, &input_at(800, 600, cursor))
        .unwrap();
    assert_eq!(context.pick(cursor).unwrap(), 1);

    listener.pickables = vec![(rect(0, 0, 100, 100), 2)];
    context
        .on_update(&mut listener, &input_at(800, 600, cursor))
        .unwrap();
    assert_eq!(context.pick(cursor).unwrap(), 2);
}

/// A recreation after present rebuilds the picking target, so nothing is
/// picked until the next frame has rendered into it.
#[rstest]
#[case::suboptimal(PresentOutcome::Suboptimal)]
#[case::out_of_date(PresentOutcome::OutOfDate)]
fn test_pick_after_recreate_waits_for_next_frame(#[case] present: PresentOutcome) {
    let mut context = context_with(800, 600, 3, &[PassKind::Picking]);
    let mut listener =
        RecordingListener::default().with_pickable(rect(100, 100, 50, 50), 0xABCD_1234);
    let cursor = Vec2::new(120.0, 130.0);
    context.backend_mut().script_present(present);

    let outcome = context
        .on_update(&mut listener, &input_at(800, 600, cursor))
        .unwrap();

    assert!(matches!(
        outcome,
        FrameOutcome::Presented {
            recreated: true,
            ..
        }
    ));
    assert_eq!(context.last_frame(), None);
    assert_eq!(context.pick(cursor).unwrap(), NO_OBJECT);
    assert!(!take_events(&mut context)
        .iter()
        .any(|event| matches!(event, DummyEvent::PickingRead { .. })));

    context
        .on_update(&mut listener, &input_at(800, 600, cursor))
        .unwrap();
    assert_eq!(context.pick(cursor).unwrap(), 0xABCD_1234);
}

/// With a viewport panel the cursor is made relative to the panel.
#[rstest]
fn test_pick_inside_viewport_panel() {
    let mut context = context_with(800, 600, 3, &[PassKind::Picking, PassKind::Viewport, PassKind::Ui]);
    let position = Vec2::new(200.0, 100.0);
    let size = Vec2::new(800.0, 600.0);
    context.set_viewport_bounds(ViewportBounds {
        position,
        size,
        min: position,
        max: position + size,
    });
    let mut listener = RecordingListener::default().with_pickable(rect(40, 40, 20, 20), 9);
    let cursor = Vec2::new(250.0, 150.0);

    context
        .on_update(&mut listener, &input_at(800, 600, cursor))
        .unwrap();

    assert_eq!(context.pick(cursor).unwrap(), 9);
    let camera = context.backend().camera(multipass_renderer::FrameSlot::FIRST).unwrap();
    assert_eq!(camera.cursor, [50.0, 50.0, 0.0, 0.0]);
}

// ============================================================================
// Error Tests
// ============================================================================

#[rstest]
fn test_pick_without_picking_pass() {
    let mut context = context_with(800, 600, 3, &[]);
    let mut listener = RecordingListener::default();
    context
        .on_update(&mut listener, &input_at(800, 600, Vec2::ZERO))
        .unwrap();

    let err = context.read_image_pixels(0, 0).unwrap_err();

    assert!(matches!(err, RendererError::MissingResource(_)));
}

#[rstest]
fn test_pick_before_first_frame() {
    let mut context = context_with(800, 600, 3, &[PassKind::Picking]);

    assert!(context.read_image_pixels(0, 0).is_err());
}

#[rstest]
#[case::x(800, 0)]
#[case::y(0, 600)]
fn test_pick_outside_surface(#[case] x: u32, #[case] y: u32) {
    let mut context = context_with(800, 600, 3, &[PassKind::Picking]);
    let mut listener = RecordingListener::default();
    context
        .on_update(&mut listener, &input_at(800, 600, Vec2::ZERO))
        .unwrap();

    let err = context.read_image_pixels(x, y).unwrap_err();

    assert!(matches!(err, RendererError::InvalidParameter(_)));
}
