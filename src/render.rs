//! Rendering surface seam
//!
//! The simulation never draws. It hands visual nodes to a [`RenderSurface`]
//! when entities appear, takes them back when entities go away, and writes
//! node transforms after every step.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Identifies one visual node for the lifetime of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VisualHandle(pub u64);

/// Geometry of a visual node, centered on its position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum VisualShape {
    Circle { radius: f32 },
    Rect { width: f32, height: f32 },
}

/// A visual node description owned by an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Visual {
    pub handle: VisualHandle,
    pub shape: VisualShape,
    /// 0xRRGGBB
    pub colour: u32,
}

pub const BALL_COLOUR: u32 = 0xffffff;

/// The display tree the simulation draws into.
pub trait RenderSurface {
    /// Attach a node at the given transform.
    fn add_node(&mut self, visual: &Visual, position: Vec2, rotation: f32);
    /// Detach a node. Unknown handles are ignored.
    fn remove_node(&mut self, handle: VisualHandle);
    /// Move a node.
    fn set_transform(&mut self, handle: VisualHandle, position: Vec2, rotation: f32);
}

/// Render surface shared between the simulation and its store subscription.
pub type SharedSurface = Rc<RefCell<dyn RenderSurface>>;

/// One attached node in a [`NodeTable`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub shape: VisualShape,
    pub colour: u32,
    pub position: Vec2,
    pub rotation: f32,
}

/// In-memory display tree.
///
/// Used by the headless runner and the web host (which reads it back each
/// frame), and by tests to check that nodes are attached and detached exactly
/// once.
#[derive(Debug, Default)]
pub struct NodeTable {
    nodes: BTreeMap<VisualHandle, Node>,
    added: usize,
    removed: usize,
}

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn get(&self, handle: VisualHandle) -> Option<&Node> {
        self.nodes.get(&handle)
    }

    /// Attached nodes in handle order
    pub fn nodes(&self) -> impl Iterator<Item = (VisualHandle, &Node)> {
        self.nodes.iter().map(|(h, n)| (*h, n))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total successful attaches since creation
    pub fn added_count(&self) -> usize {
        self.added
    }

    /// Total successful detaches since creation
    pub fn removed_count(&self) -> usize {
        self.removed
    }
}

impl RenderSurface for NodeTable {
    fn add_node(&mut self, visual: &Visual, position: Vec2, rotation: f32) {
        if self.nodes.contains_key(&visual.handle) {
            log::warn!("Visual {:?} already attached, ignoring", visual.handle);
            return;
        }
        self.nodes.insert(
            visual.handle,
            Node {
                shape: visual.shape,
                colour: visual.colour,
                position,
                rotation,
            },
        );
        self.added += 1;
    }

    fn remove_node(&mut self, handle: VisualHandle) {
        if self.nodes.remove(&handle).is_some() {
            self.removed += 1;
        }
    }

    fn set_transform(&mut self, handle: VisualHandle, position: Vec2, rotation: f32) {
        if let Some(node) = self.nodes.get_mut(&handle) {
            node.position = position;
            node.rotation = rotation;
        }
    }
}

/// Map a MIDI pitch (0-127) onto the colour wheel as 0xRRGGBB.
pub fn pitch_to_colour(pitch: u8) -> u32 {
    let hue = pitch as f32 / 127.0 * 360.0;
    let (r, g, b) = hsl_to_rgb(hue, 0.8, 0.5);
    (r << 16) | (g << 8) | b
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (u32, u32, u32) {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = l - c / 2.0;

    let (r, g, b) = match h {
        h if h < 60.0 => (c, x, 0.0),
        h if h < 120.0 => (x, c, 0.0),
        h if h < 180.0 => (0.0, c, x),
        h if h < 240.0 => (0.0, x, c),
        h if h < 300.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    let channel = |v: f32| ((v + m) * 255.0).round() as u32;
    (channel(r), channel(g), channel(b))
}
