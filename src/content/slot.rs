// SPDX-License-Identifier: GPL-3.0-only

//! Active content and the swap state machine
//!
//! ```text
//!   Idle --begin_swap--> Swapping --complete_swap--> Idle
//! ```
//!
//! While swapping, the outgoing bundle stays published (hidden) so every
//! parameter the renderer reads still comes from one bundle. The incoming
//! bundle becomes visible only through `complete_swap`.

use super::{ColorParameters, ContentBundle, LutType};
use crate::errors::ContentError;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SwapState {
    #[default]
    Idle,
    Swapping,
}

/// Parameters the renderer derives from the published bundle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishedParameters {
    pub color: ColorParameters,
    pub has_world_lut: bool,
    pub has_overlay: bool,
    pub needs_eye_update: bool,
    pub needs_camera_texture: bool,
}

#[derive(Debug, Default)]
pub struct ContentSlot {
    active: Option<ContentBundle>,
    pending: Option<ContentBundle>,
    state: SwapState,
}

impl ContentSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SwapState {
        self.state
    }

    pub fn is_swapping(&self) -> bool {
        self.state == SwapState::Swapping
    }

    /// Published bundle
    pub fn active(&self) -> Option<&ContentBundle> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ContentBundle> {
        self.active.as_mut()
    }

    /// Start replacing the active bundle; the old one is hidden
    pub fn begin_swap(&mut self, next: Option<ContentBundle>) -> Result<(), ContentError> {
        if self.state == SwapState::Swapping {
            return Err(ContentError::SwapInProgress);
        }
        if let Some(active) = self.active.as_mut() {
            active.set_hidden(true);
        }
        debug!(next = ?next, "Content swap started");
        self.pending = next;
        self.state = SwapState::Swapping;
        Ok(())
    }

    /// Publish the pending bundle and release the old one
    pub fn complete_swap(&mut self) -> Result<Option<&ContentBundle>, ContentError> {
        if self.state != SwapState::Swapping {
            return Err(ContentError::NoSwapPending);
        }
        let outgoing = std::mem::replace(&mut self.active, self.pending.take());
        if let Some(old) = outgoing {
            release(old);
        }
        self.state = SwapState::Idle;
        debug!(active = ?self.active, "Content swap completed");
        Ok(self.active.as_ref())
    }

    /// Both transitions at once
    pub fn replace(&mut self, next: Option<ContentBundle>) -> Result<Option<&ContentBundle>, ContentError> {
        self.begin_swap(next)?;
        self.complete_swap()
    }

    /// Parameters of the published bundle (neutral without content)
    pub fn published_parameters(&self) -> PublishedParameters {
        match self.active.as_ref() {
            Some(bundle) => PublishedParameters {
                color: bundle.color_parameters(),
                has_world_lut: bundle.lookup_table(LutType::World).is_some(),
                has_overlay: bundle.overlay_scene().is_some(),
                needs_eye_update: bundle.needs_eye_update(),
                needs_camera_texture: bundle.needs_camera_texture(),
            },
            None => PublishedParameters {
                color: ColorParameters::default(),
                has_world_lut: false,
                has_overlay: false,
                needs_eye_update: false,
                needs_camera_texture: false,
            },
        }
    }
}

/// Drop an outgoing bundle on the blocking pool of the current tokio
/// runtime, or inline when there is none
///
/// Returns whether the drop was deferred.
fn release(bundle: ContentBundle) -> bool {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(move || drop(bundle));
            true
        }
        Err(_) => {
            drop(bundle);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{FaceMaskContent, LookupTable, OverlayContent, OverlayScene};
    use crate::filters::KalmanConfig;
    use image::RgbaImage;

    fn mask() -> ContentBundle {
        ContentBundle::face_mask(FaceMaskContent::new(KalmanConfig::default()))
    }

    fn graded_overlay() -> ContentBundle {
        ContentBundle::overlay(
            OverlayContent::new(OverlayScene::new(RgbaImage::new(4, 4)))
                .with_lookup_table(LutType::World, LookupTable::identity(4))
                .with_color_parameters(ColorParameters {
                    contrast: 0.3,
                    saturation: 1.4,
                    lut_intensity: 0.5,
                }),
        )
    }

    #[test]
    fn test_parameters_switch_atomically() {
        let mut slot = ContentSlot::new();
        slot.replace(Some(mask())).unwrap();
        let before = slot.published_parameters();
        assert!(before.color.is_neutral());
        assert!(before.needs_eye_update);

        slot.begin_swap(Some(graded_overlay())).unwrap();
        assert!(slot.is_swapping());
        assert_eq!(slot.published_parameters(), before);

        slot.complete_swap().unwrap();
        let after = slot.published_parameters();
        assert!(after.has_world_lut);
        assert!(after.has_overlay);
        assert!(!after.needs_eye_update);
        assert!(!after.needs_camera_texture);
        assert_eq!(after.color.saturation, 1.4);
        assert_eq!(slot.state(), SwapState::Idle);
    }

    #[test]
    fn test_swap_hides_outgoing_content() {
        let mut slot = ContentSlot::new();
        slot.replace(Some(graded_overlay())).unwrap();
        slot.begin_swap(None).unwrap();
        match slot.active() {
            Some(ContentBundle::Overlay(overlay)) => assert!(overlay.is_hidden()),
            other => panic!("unexpected active content: {:?}", other),
        }
        assert!(slot.complete_swap().unwrap().is_none());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut slot = ContentSlot::new();
        assert!(matches!(
            slot.complete_swap(),
            Err(ContentError::NoSwapPending)
        ));
        slot.begin_swap(Some(mask())).unwrap();
        assert!(matches!(
            slot.begin_swap(None),
            Err(ContentError::SwapInProgress)
        ));
    }

    #[test]
    fn test_release_without_runtime_drops_inline() {
        assert!(!release(mask()));
    }

    #[tokio::test]
    async fn test_release_defers_to_blocking_pool() {
        assert!(release(mask()));

        let mut slot = ContentSlot::new();
        slot.replace(Some(mask())).unwrap();
        slot.replace(None).unwrap();
        assert!(slot.active().is_none());
    }
}
