// SPDX-License-Identifier: GPL-3.0-only

//! Overlay-only content: a full-viewport image with optional grading

use super::lut::LookupTable;
use super::scene::{NodeId, NodeKind, SceneArena};
use super::{ColorParameters, LutType, WorldAnchorBinding};
use glam::Vec2;
use image::RgbaImage;
use std::collections::HashMap;

/// How an overlay image is fitted to the viewport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScaleMode {
    /// Cover the viewport, cropping the image's overflow
    #[default]
    AspectFill,
    /// Stretch to the viewport
    Fill,
}

/// Image drawn over the whole viewport
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayScene {
    pub image: RgbaImage,
    pub scale_mode: ScaleMode,
}

impl OverlayScene {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            scale_mode: ScaleMode::AspectFill,
        }
    }

    /// Half extents of the overlay quad in normalized device coordinates
    pub fn quad_extent(&self, viewport: (u32, u32)) -> Vec2 {
        quad_extent(self.image.dimensions(), viewport, self.scale_mode)
    }
}

/// Half extents of an `image`-sized quad scaled into `viewport`
///
/// With aspect fill the smaller axis is exactly 1 and the other one
/// overflows the viewport.
pub fn quad_extent(image: (u32, u32), viewport: (u32, u32), mode: ScaleMode) -> Vec2 {
    let image = Vec2::new(image.0.max(1) as f32, image.1.max(1) as f32);
    let view = Vec2::new(viewport.0.max(1) as f32, viewport.1.max(1) as f32);
    match mode {
        ScaleMode::Fill => Vec2::ONE,
        ScaleMode::AspectFill => {
            let scale = (view.x / image.x).max(view.y / image.y);
            image * scale / view
        }
    }
}

pub struct OverlayContent {
    scene: SceneArena,
    root: NodeId,
    overlay: Option<OverlayScene>,
    world: Option<WorldAnchorBinding>,
    lookup_tables: HashMap<LutType, LookupTable>,
    color: ColorParameters,
}

impl Default for OverlayContent {
    fn default() -> Self {
        let mut scene = SceneArena::new();
        let root = scene.add(NodeKind::Group, None);
        Self {
            scene,
            root,
            overlay: None,
            world: None,
            lookup_tables: HashMap::new(),
            color: ColorParameters::default(),
        }
    }
}

impl OverlayContent {
    pub fn new(overlay: OverlayScene) -> Self {
        Self {
            overlay: Some(overlay),
            ..Self::default()
        }
    }

    pub fn with_lookup_table(mut self, kind: LutType, table: LookupTable) -> Self {
        self.lookup_tables.insert(kind, table);
        self
    }

    pub fn with_color_parameters(mut self, color: ColorParameters) -> Self {
        self.color = color;
        self
    }

    pub fn with_world_anchor(mut self, anchor_id: u64) -> Self {
        let node = self.scene.add(NodeKind::Group, Some(self.root));
        // Anchor updates store view * anchor, which already is the model-view
        if let Some(world) = self.scene.get_mut(node) {
            world.camera_space = true;
        }
        self.world = Some(WorldAnchorBinding { anchor_id, node });
        self
    }

    pub fn scene(&self) -> &SceneArena {
        &self.scene
    }

    pub fn overlay_scene(&self) -> Option<&OverlayScene> {
        self.overlay.as_ref()
    }

    pub fn world_node(&self) -> Option<WorldAnchorBinding> {
        self.world
    }

    pub fn lookup_table(&self, kind: LutType) -> Option<&LookupTable> {
        self.lookup_tables.get(&kind)
    }

    pub fn color_parameters(&self) -> ColorParameters {
        self.color
    }

    pub fn set_transform(&mut self, node: NodeId, transform: glam::Mat4) {
        self.scene.set_transform(node, transform);
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        if let Some(node) = self.scene.get_mut(self.root) {
            node.hidden = hidden;
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.scene.get(self.root).is_some_and(|node| node.hidden)
    }
}
