//! Frame coordinator tests.
//!
//! These run the coordinator against the software backend and check the
//! order in which frame resources are touched.
//!
//! # Test Categories
//!
//! - **Pacing Tests**: fence waits, slot rotation and image acquisition
//! - **Pass Order Tests**: which passes are recorded and in which order
//! - **Retirement Tests**: deferred release of replaced resources
//!
//! ```bash
//! cargo test --test frame_tests
//! ```

mod common;

use rstest::rstest;

use common::{context_with, input, rect, submitted_passes, take_events, Call, RecordingListener};
use multipass_renderer::backend::{DummyEvent, PresentOutcome};
use multipass_renderer::{
    FrameOutcome, FrameSlot, ImageIndex, PassKind, RenderStage, RendererError, SkipReason,
};

// ============================================================================
// Pacing Tests
// ============================================================================

/// The first frame touches its resources in the documented order.
#[rstest]
fn test_first_frame_event_order() {
    let mut context = context_with(800, 600, 3, &[]);
    let mut listener = RecordingListener::default();

    let outcome = context.on_update(&mut listener, &input(800, 600)).unwrap();

    let slot = FrameSlot::FIRST;
    let image = ImageIndex::new(0);
    assert_eq!(
        outcome,
        FrameOutcome::Presented {
            slot,
            image,
            recreated: false
        }
    );
    assert_eq!(
        take_events(&mut context),
        vec![
            DummyEvent::FenceWaited {
                slot,
                was_pending: false
            },
            DummyEvent::CameraWritten {
                slot,
                fence_signaled: true
            },
            DummyEvent::Acquired { slot, image },
            DummyEvent::FenceReset { slot },
            DummyEvent::PassBegun {
                pass: PassKind::Swapchain,
                slot,
                image,
                scissor: rect(0, 0, 800, 600),
            },
            DummyEvent::PassEnded {
                pass: PassKind::Swapchain,
                slot
            },
            DummyEvent::Submitted {
                slot,
                passes: vec![PassKind::Swapchain]
            },
            DummyEvent::Presented {
                slot,
                image,
                outcome: PresentOutcome::Presented
            },
        ]
    );
}

/// Slots alternate while images cycle independently of them.
#[rstest]
#[case::two_images(2)]
#[case::three_images(3)]
#[case::four_images(4)]
fn test_slots_and_images_rotate(#[case] image_count: u32) {
    let mut context = context_with(640, 480, image_count, &[]);
    let mut listener = RecordingListener::default();

    for frame in 0..8u32 {
        let outcome = context.on_update(&mut listener, &input(640, 480)).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                slot: FrameSlot::new(frame as usize % 2),
                image: ImageIndex::new(frame % image_count),
                recreated: false,
            }
        );
    }
    assert_eq!(context.frames_submitted(), 8);
}

/// The uniform memory of a slot is only written after its fence was waited on,
/// and from the third frame on that wait covers a real submission.
#[rstest]
fn test_camera_written_after_fence_wait() {
    let mut context = context_with(800, 600, 3, &[]);
    let mut listener = RecordingListener::default();

    for frame in 0..6usize {
        context.on_update(&mut listener, &input(800, 600)).unwrap();
        let events = take_events(&mut context);
        let slot = FrameSlot::new(frame % 2);

        assert_eq!(
            events[0],
            DummyEvent::FenceWaited {
                slot,
                was_pending: frame >= 2
            }
        );
        assert_eq!(
            events[1],
            DummyEvent::CameraWritten {
                slot,
                fence_signaled: true
            }
        );
    }
}

/// Callbacks see the slot and image of the frame being recorded.
#[rstest]
fn test_callbacks_receive_frame_resources() {
    let mut context = context_with(800, 600, 3, &[]);
    let mut listener = RecordingListener::default();

    for _ in 0..3 {
        context.on_update(&mut listener, &input(800, 600)).unwrap();
    }

    let frames: Vec<(FrameSlot, ImageIndex)> = listener
        .calls
        .iter()
        .filter_map(|call| match *call {
            Call::Render { slot, image, .. } => Some((slot, image)),
            _ => None,
        })
        .collect();
    assert_eq!(
        frames,
        vec![
            (FrameSlot::new(0), ImageIndex::new(0)),
            (FrameSlot::new(1), ImageIndex::new(1)),
            (FrameSlot::new(0), ImageIndex::new(2)),
        ]
    );
}

/// A zero-sized framebuffer skips the tick without touching the GPU.
#[rstest]
#[case::zero_width(0, 600)]
#[case::zero_height(800, 0)]
#[case::zero_both(0, 0)]
fn test_minimized_window_skips(#[case] width: u32, #[case] height: u32) {
    let mut context = context_with(800, 600, 3, &[]);
    let mut listener = RecordingListener::default();

    let outcome = context.on_update(&mut listener, &input(width, height)).unwrap();

    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::Minimized));
    assert!(take_events(&mut context).is_empty());
    assert!(listener.calls.is_empty());
    assert_eq!(context.frames_submitted(), 0);
}

// ============================================================================
// Pass Order Tests
// ============================================================================

/// Enabled passes are always recorded and submitted in execution order,
/// whatever order they were enabled in.
#[rstest]
#[case::swapchain_only(&[], &[PassKind::Swapchain])]
#[case::picking(&[PassKind::Picking], &[PassKind::Swapchain, PassKind::Picking])]
#[case::ui(&[PassKind::Ui], &[PassKind::Swapchain, PassKind::Ui])]
#[case::viewport_and_ui(
    &[PassKind::Ui, PassKind::Viewport],
    &[PassKind::Swapchain, PassKind::Viewport, PassKind::Ui]
)]
#[case::all_reversed(
    &[PassKind::Ui, PassKind::Viewport, PassKind::Picking],
    &[PassKind::Swapchain, PassKind::Picking, PassKind::Viewport, PassKind::Ui]
)]
fn test_pass_execution_order(#[case] enabled: &[PassKind], #[case] expected: &[PassKind]) {
    let mut context = context_with(800, 600, 3, enabled);
    let mut listener = RecordingListener::default();

    context.on_update(&mut listener, &input(800, 600)).unwrap();
    let events = take_events(&mut context);

    let begun: Vec<PassKind> = events
        .iter()
        .filter_map(|event| match event {
            DummyEvent::PassBegun { pass, .. } => Some(*pass),
            _ => None,
        })
        .collect();
    assert_eq!(begun, expected);
    assert_eq!(submitted_passes(&events), vec![expected.to_vec()]);
}

/// Every pass is ended before the next one begins and before the submit.
#[rstest]
fn test_passes_do_not_interleave() {
    let mut context = context_with(
        800,
        600,
        3,
        &[PassKind::Picking, PassKind::Viewport, PassKind::Ui],
    );
    let mut listener = RecordingListener::default();

    context.on_update(&mut listener, &input(800, 600)).unwrap();

    let mut open: Option<PassKind> = None;
    for event in take_events(&mut context) {
        match event {
            DummyEvent::PassBegun { pass, .. } => {
                assert_eq!(open, None, "{pass} began while another pass was open");
                open = Some(pass);
            }
            DummyEvent::PassEnded { pass, .. } => {
                assert_eq!(open, Some(pass));
                open = None;
            }
            DummyEvent::Submitted { .. } => assert_eq!(open, None),
            _ => {}
        }
    }
}

/// The scene is drawn into the viewport when there is one and never into both
/// targets.
#[rstest]
#[case::swapchain(false, PassKind::Swapchain)]
#[case::viewport(true, PassKind::Viewport)]
fn test_scene_drawn_into_one_target(#[case] viewport: bool, #[case] scene_pass: PassKind) {
    let mut passes = vec![PassKind::Ui];
    if viewport {
        passes.push(PassKind::Viewport);
    }
    let mut context = context_with(800, 600, 3, &passes);
    let mut listener = RecordingListener::default();

    context.on_update(&mut listener, &input(800, 600)).unwrap();

    assert_eq!(
        listener.calls,
        vec![
            Call::Render {
                stage: RenderStage::Default,
                pass: scene_pass,
                slot: FrameSlot::FIRST,
                image: ImageIndex::new(0),
            },
            Call::Overlay { pass: scene_pass },
            Call::Ui { pass: PassKind::Ui },
        ]
    );
}

/// The wireframe toggle swaps the scene stage but leaves picking alone.
#[rstest]
fn test_wireframe_stage() {
    let mut context = context_with(800, 600, 3, &[PassKind::Picking]);
    let mut listener = RecordingListener::default();

    context.set_wireframe(true);
    context.on_update(&mut listener, &input(800, 600)).unwrap();
    context.set_wireframe(false);
    context.on_update(&mut listener, &input(800, 600)).unwrap();

    assert_eq!(
        listener.renders(),
        vec![
            (RenderStage::Wireframe, PassKind::Swapchain),
            (RenderStage::Picking, PassKind::Picking),
            (RenderStage::Default, PassKind::Swapchain),
            (RenderStage::Picking, PassKind::Picking),
        ]
    );
}

/// A callback that fails aborts the frame: its pass is closed, later passes are
/// not recorded and nothing is submitted or presented.
#[rstest]
#[case::swapchain(PassKind::Swapchain)]
#[case::picking(PassKind::Picking)]
#[case::ui(PassKind::Ui)]
fn test_failed_callback_aborts_frame(#[case] failing: PassKind) {
    let mut context = context_with(800, 600, 3, &[PassKind::Picking, PassKind::Ui]);
    let mut listener = RecordingListener::default().failing_in(failing);

    let err = context
        .on_update(&mut listener, &input(800, 600))
        .unwrap_err();

    assert!(matches!(err, RendererError::CommandFailed(_)));
    let events = take_events(&mut context);
    assert!(events.contains(&DummyEvent::PassEnded {
        pass: failing,
        slot: FrameSlot::FIRST
    }));
    let last_begun = events
        .iter()
        .filter_map(|event| match event {
            DummyEvent::PassBegun { pass, .. } => Some(*pass),
            _ => None,
        })
        .last();
    assert_eq!(last_begun, Some(failing));
    assert!(submitted_passes(&events).is_empty());
    assert!(!events
        .iter()
        .any(|event| matches!(event, DummyEvent::Presented { .. })));
    assert_eq!(context.frames_submitted(), 0);
    assert_eq!(context.last_frame(), None);
}

// ============================================================================
// Retirement Tests
// ============================================================================

/// A pass removed between frames is released only once the slot of the last
/// frame that used it comes around again.
#[rstest]
fn test_removed_pass_released_after_its_frame() {
    let mut context = context_with(800, 600, 3, &[PassKind::Picking]);
    let mut listener = RecordingListener::default();

    // Frame on slot 0 still records picking.
    context.on_update(&mut listener, &input(800, 600)).unwrap();
    assert!(context.backend_mut().disable_pass(PassKind::Picking));
    assert_eq!(context.backend().retired_count(), 1);
    take_events(&mut context);

    // Slot 1: the picking pass is gone but not released yet.
    context.on_update(&mut listener, &input(800, 600)).unwrap();
    let events = take_events(&mut context);
    assert!(!events
        .iter()
        .any(|event| matches!(event, DummyEvent::Released { .. })));
    assert_eq!(submitted_passes(&events), vec![vec![PassKind::Swapchain]]);

    // Slot 0 again: its fence covers the last use, so it is released.
    context.on_update(&mut listener, &input(800, 600)).unwrap();
    let events = take_events(&mut context);
    assert!(events.contains(&DummyEvent::Released {
        slot: FrameSlot::FIRST,
        count: 1
    }));
    assert_eq!(context.backend().retired_count(), 0);
}

/// Shutdown waits for the device and hands the backend back.
#[rstest]
fn test_shutdown_returns_backend() {
    let mut context = context_with(800, 600, 3, &[PassKind::Picking]);
    let mut listener = RecordingListener::default();
    context.on_update(&mut listener, &input(800, 600)).unwrap();
    context.backend_mut().disable_pass(PassKind::Picking);

    let backend = context.shutdown().unwrap();

    assert_eq!(backend.retired_count(), 0);
}
