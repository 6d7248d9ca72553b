// SPDX-License-Identifier: GPL-3.0-only

//! Flat node arena for content scenes
//!
//! Nodes reference their parent by [`NodeId`]; there are no owning links
//! between nodes, so a scene can never form a reference cycle.

use super::fade::Fade;
use crate::eyes::Eye;
use glam::Mat4;
use std::time::{Duration, Instant};

/// Index of a node in its [`SceneArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// What a node draws
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Transform only
    Group,
    /// The tracked face mesh, lit, with the content's face texture
    FaceMesh,
    /// Unlit iris quad, positioned in camera space
    Iris(Eye),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    /// Local transform relative to the parent
    pub transform: Mat4,
    /// Camera-space node: its transform already is the model-view
    pub camera_space: bool,
    pub hidden: bool,
    pub opacity: Fade,
}

/// One drawable resolved against a view matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneDraw {
    pub node: NodeId,
    pub kind: NodeKind,
    pub model_view: Mat4,
    pub opacity: f32,
}

#[derive(Debug, Clone, Default)]
pub struct SceneArena {
    nodes: Vec<Node>,
}

impl SceneArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent,
            transform: Mat4::IDENTITY,
            camera_space: false,
            hidden: false,
            opacity: Fade::settled(1.0),
        });
        id
    }

    /// Add a node whose transform is given in camera space
    pub fn add_camera_space(&mut self, kind: NodeKind) -> NodeId {
        let id = self.add(kind, None);
        self.nodes[id.0].camera_space = true;
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn set_transform(&mut self, id: NodeId, transform: Mat4) {
        if let Some(node) = self.get_mut(id) {
            node.transform = transform;
        }
    }

    /// Start fading a node to `target` opacity
    pub fn fade_to(&mut self, id: NodeId, target: f32, duration: Duration, now: Instant) {
        if let Some(node) = self.get_mut(id) {
            node.opacity.retarget(target, duration, now);
        }
    }

    /// Parent chain up to the root, multiplied out
    pub fn world_transform(&self, id: NodeId) -> Mat4 {
        let mut transform = Mat4::IDENTITY;
        let mut current = Some(id);
        // Arena parents always precede their children, so this terminates
        while let Some(node) = current.and_then(|id| self.get(id)) {
            transform = node.transform * transform;
            current = node.parent.filter(|parent| parent.0 < current.map_or(0, |c| c.0));
        }
        transform
    }

    /// Product of opacities along the parent chain; zero if any is hidden
    pub fn effective_opacity(&self, id: NodeId, now: Instant) -> f32 {
        let mut opacity = 1.0;
        let mut current = Some(id);
        while let Some(node) = current.and_then(|id| self.get(id)) {
            if node.hidden {
                return 0.0;
            }
            opacity *= node.opacity.value(now);
            current = node.parent.filter(|parent| parent.0 < current.map_or(0, |c| c.0));
        }
        opacity
    }

    /// Visible drawables for the frame
    pub fn draw_list(&self, view: Mat4, now: Instant) -> Vec<SceneDraw> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.kind != NodeKind::Group)
            .filter_map(|(index, node)| {
                let id = NodeId(index);
                let opacity = self.effective_opacity(id, now);
                if opacity <= 0.0 {
                    return None;
                }
                let world = self.world_transform(id);
                let model_view = if node.camera_space { world } else { view * world };
                Some(SceneDraw {
                    node: id,
                    kind: node.kind,
                    model_view,
                    opacity,
                })
            })
            .collect()
    }
}
