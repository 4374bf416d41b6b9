//! Swapchain recreation tests.
//!
//! Recreation is triggered by an out-of-date acquire, by a suboptimal or
//! out-of-date present, or by the window's resize hint. Each one rebuilds the
//! swapchain-sized state and queues a resize notification.

mod common;

use rstest::rstest;

use common::{context_with, extent, input, take_events, RecordingListener};
use multipass_renderer::backend::{DummyEvent, FrameBackend, PresentOutcome};
use multipass_renderer::{FrameOutcome, FrameSlot, PassKind, RendererEvent, SkipReason};

fn assert_aspect(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 1e-5,
        "aspect ratio {actual} != {expected}"
    );
}

/// Growing the window from 800x600 to 1920x1080 between frames.
#[rstest]
fn test_resize_800x600_to_1920x1080() {
    let mut context = context_with(800, 600, 3, &[PassKind::Picking, PassKind::Ui]);
    let mut listener = RecordingListener::default();

    context.on_update(&mut listener, &input(800, 600)).unwrap();
    take_events(&mut context);

    context.backend_mut().resize_surface(1920, 1080);
    let outcome = context.on_update(&mut listener, &input(1920, 1080)).unwrap();

    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::OutOfDate));
    let events = take_events(&mut context);
    assert!(events.contains(&DummyEvent::AcquireOutOfDate {
        slot: FrameSlot::new(1)
    }));
    assert!(events.contains(&DummyEvent::Recreated {
        extent: ash::vk::Extent2D {
            width: 1920,
            height: 1080
        }
    }));
    // The skipped frame never reset its fence, so the next wait cannot hang.
    assert!(!events
        .iter()
        .any(|event| matches!(event, DummyEvent::FenceReset { .. })));

    let resized = context.drain_events();
    assert_eq!(resized.len(), 1);
    let RendererEvent::Resized {
        width,
        height,
        aspect_ratio,
        image_count,
    } = resized[0];
    assert_eq!((width, height), (1920, 1080));
    assert_aspect(aspect_ratio, 16.0 / 9.0);
    assert_eq!(image_count, 3);

    // The skipped tick did not consume a slot.
    let outcome = context.on_update(&mut listener, &input(1920, 1080)).unwrap();
    assert!(matches!(
        outcome,
        FrameOutcome::Presented {
            slot,
            recreated: false,
            ..
        } if slot == FrameSlot::new(1)
    ));
    assert_eq!(extent(&context).width, 1920);
    assert_aspect(context.aspect_ratio(), 16.0 / 9.0);
    assert_eq!(
        context.viewport_bounds().size,
        glam::Vec2::new(1920.0, 1080.0)
    );
}

/// A present that is not clean recreates the swapchain after the frame.
#[rstest]
#[case::presented(PresentOutcome::Presented, false)]
#[case::suboptimal(PresentOutcome::Suboptimal, true)]
#[case::out_of_date(PresentOutcome::OutOfDate, true)]
fn test_present_outcome_recreates(#[case] present: PresentOutcome, #[case] recreated: bool) {
    let mut context = context_with(800, 600, 3, &[]);
    let mut listener = RecordingListener::default();
    context.backend_mut().script_present(present);

    let outcome = context.on_update(&mut listener, &input(800, 600)).unwrap();

    assert!(matches!(
        outcome,
        FrameOutcome::Presented { recreated: r, .. } if r == recreated
    ));
    assert_eq!(context.drain_events().len(), usize::from(recreated));
    assert_eq!(context.frames_submitted(), 1);
}

/// The window's resize hint recreates even when present was clean.
#[rstest]
fn test_resize_hint_recreates_after_present() {
    let mut context = context_with(800, 600, 3, &[]);
    let mut listener = RecordingListener::default();
    let mut frame = input(1024, 768);
    frame.resize_hint = true;
    context.backend_mut().resize_surface(1024, 768);

    // The surface change is caught at acquire first.
    let outcome = context.on_update(&mut listener, &frame).unwrap();
    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::OutOfDate));

    let outcome = context.on_update(&mut listener, &frame).unwrap();
    assert!(matches!(
        outcome,
        FrameOutcome::Presented {
            recreated: true,
            ..
        }
    ));
    assert_eq!(context.drain_events().len(), 2);
}

/// Recreating at an unchanged size leaves the same state behind each time.
#[rstest]
fn test_recreate_is_idempotent() {
    let mut context = context_with(800, 600, 3, &[PassKind::Picking]);
    let mut listener = RecordingListener::default();
    context.on_update(&mut listener, &input(800, 600)).unwrap();

    let first = context.recreate((800, 600)).unwrap();
    let second = context.recreate((800, 600)).unwrap();

    assert_eq!(first, second);
    let events = context.drain_events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], events[1]);
    assert_eq!(context.backend().frames_in_flight(), 2);

    let outcome = context.on_update(&mut listener, &input(800, 600)).unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { recreated: false, .. }));
}

/// Recreation waits for outstanding work, so nothing retired survives it.
#[rstest]
fn test_recreate_releases_retired_resources() {
    let mut context = context_with(800, 600, 3, &[PassKind::Picking]);
    let mut listener = RecordingListener::default();
    context.on_update(&mut listener, &input(800, 600)).unwrap();
    context.backend_mut().disable_pass(PassKind::Picking);
    assert_eq!(context.backend().retired_count(), 1);

    context.recreate((1280, 720)).unwrap();

    assert_eq!(context.backend().retired_count(), 0);
}
