// SPDX-License-Identifier: GPL-3.0-only

//! Applies tracked anchors to the active content

use crate::content::ContentSlot;
use crate::tracking::{Anchor, TrackingFrame};
use std::time::Instant;
use tracing::{debug, trace};

/// What one anchor update touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnchorUpdate {
    /// A tracked face anchor was present
    pub tracking: bool,
    pub face_updated: bool,
    pub world_updated: bool,
    /// Skipped because a content swap is in progress
    pub suppressed: bool,
}

/// Pushes tracking state and anchor transforms into the content slot
///
/// Tracking changes are forwarded only on transitions, so content fades
/// are not restarted every frame.
#[derive(Debug, Default)]
pub struct AnchorUpdater {
    tracking: bool,
    pushed: Option<bool>,
}

impl AnchorUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the last frame carried a tracked face
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Newly published content has not been told the tracking state yet
    pub fn invalidate(&mut self) {
        self.pushed = None;
    }

    pub fn update(&mut self, slot: &mut ContentSlot, frame: &TrackingFrame, now: Instant) -> AnchorUpdate {
        let face = frame.face_anchor().filter(|face| face.is_tracked);
        self.tracking = face.is_some();

        let mut update = AnchorUpdate {
            tracking: self.tracking,
            ..AnchorUpdate::default()
        };

        if slot.is_swapping() {
            trace!("Content swap in progress, anchor update skipped");
            update.suppressed = true;
            return update;
        }
        let Some(content) = slot.active_mut() else {
            return update;
        };

        if self.pushed != Some(self.tracking) {
            debug!(tracking = self.tracking, "Tracking state changed");
            content.set_tracking(self.tracking, now);
            self.pushed = Some(self.tracking);
        }

        if let Some(face) = face {
            content.update_face_anchor(face);
            update.face_updated = true;
        }

        if let Some(binding) = content.world_node() {
            for anchor in &frame.anchors {
                if let Anchor::World { id, transform } = anchor {
                    if *id == binding.anchor_id {
                        content.set_transform(binding.node, frame.camera.view * *transform);
                        update.world_updated = true;
                    }
                }
            }
        }

        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentBundle, FaceMaskContent, OverlayContent, OverlayScene};
    use crate::filters::KalmanConfig;
    use crate::tracking::synthetic::{SyntheticFaceSource, WORLD_ANCHOR_ID};
    use glam::{Mat4, Vec3};
    use image::RgbaImage;

    fn mask_slot() -> ContentSlot {
        let mut slot = ContentSlot::new();
        let content = FaceMaskContent::new(KalmanConfig::default()).with_world_anchor(WORLD_ANCHOR_ID);
        slot.replace(Some(ContentBundle::face_mask(content))).unwrap();
        slot
    }

    fn face_mask(slot: &ContentSlot) -> &FaceMaskContent {
        match slot.active() {
            Some(ContentBundle::FaceMask(mask)) => mask,
            other => panic!("expected face mask, got {:?}", other),
        }
    }

    #[test]
    fn test_tracked_face_updates_content() {
        let mut slot = mask_slot();
        let mut updater = AnchorUpdater::new();
        let frame = SyntheticFaceSource::new(720, 1280).next_frame();

        let update = updater.update(&mut slot, &frame, Instant::now());
        assert!(update.tracking);
        assert!(update.face_updated);
        assert!(updater.is_tracking());
        assert!(face_mask(&slot).is_tracking());
    }

    #[test]
    fn test_lost_face_stops_tracking() {
        let mut slot = mask_slot();
        let mut updater = AnchorUpdater::new();
        let mut frame = SyntheticFaceSource::new(720, 1280).next_frame();
        updater.update(&mut slot, &frame, Instant::now());

        frame.anchors.retain(|anchor| !matches!(anchor, Anchor::Face(_)));
        let update = updater.update(&mut slot, &frame, Instant::now());
        assert!(!update.tracking);
        assert!(!update.face_updated);
        assert!(!face_mask(&slot).is_tracking());
    }

    #[test]
    fn test_world_anchor_sets_view_relative_transform() {
        let mut slot = mask_slot();
        let mut updater = AnchorUpdater::new();
        let mut frame = SyntheticFaceSource::new(720, 1280).next_frame();
        let anchor = Mat4::from_translation(Vec3::new(0.5, 0.0, -2.0));
        frame.camera.view = Mat4::from_translation(Vec3::new(0.0, -1.0, 0.0));
        frame.anchors.retain(|anchor| !matches!(anchor, Anchor::World { .. }));
        frame.anchors.push(Anchor::World {
            id: WORLD_ANCHOR_ID,
            transform: anchor,
        });
        frame.anchors.push(Anchor::World {
            id: WORLD_ANCHOR_ID + 100,
            transform: Mat4::IDENTITY,
        });

        let update = updater.update(&mut slot, &frame, Instant::now());
        assert!(update.world_updated);

        let binding = face_mask(&slot).world_node().unwrap();
        let node = face_mask(&slot).scene().get(binding.node).unwrap();
        assert_eq!(node.transform, frame.camera.view * anchor);
    }

    #[test]
    fn test_swap_suppresses_updates() {
        let mut slot = mask_slot();
        let mut updater = AnchorUpdater::new();
        let frame = SyntheticFaceSource::new(720, 1280).next_frame();

        let overlay = OverlayContent::new(OverlayScene::new(RgbaImage::new(4, 4)));
        slot.begin_swap(Some(ContentBundle::overlay(overlay))).unwrap();
        let update = updater.update(&mut slot, &frame, Instant::now());
        assert!(update.suppressed);
        assert!(!update.face_updated);
        assert!(!face_mask(&slot).is_tracking());

        // Resumes once the swap settles, against the new content
        slot.complete_swap().unwrap();
        updater.invalidate();
        let update = updater.update(&mut slot, &frame, Instant::now());
        assert!(!update.suppressed);
        assert!(update.face_updated);
    }

    #[test]
    fn test_no_content_is_noop() {
        let mut slot = ContentSlot::new();
        let mut updater = AnchorUpdater::new();
        let frame = SyntheticFaceSource::new(720, 1280).next_frame();
        let update = updater.update(&mut slot, &frame, Instant::now());
        assert!(update.tracking);
        assert!(!update.face_updated);
        assert!(!update.world_updated);
    }
}
