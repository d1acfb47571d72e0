//! World registry: labels → live scene nodes, collidable obstacles, and
//! bounded scene snapshots for grounding agent turns.
//!
//! The registry never owns the scene. It holds a weak handle to the
//! [`Scene`] built by the construction code plus plain [`NodeId`]s, so once
//! the scene is torn down every lookup degrades to "not found". When the
//! scene root changes, callers must [`WorldRegistry::clear`] and register
//! labels and collidables again.

use crate::scene::{NodeId, Scene, SharedScene};
use crate::types::Vec3;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

pub const SNAPSHOT_START: &str = "[[WORLD_SNAPSHOT_START]]";
pub const SNAPSHOT_END: &str = "[[WORLD_SNAPSHOT_END]]";

/// Collision radius of the player surrogate.
pub const PLAYER_RADIUS: f32 = 0.5;

/// Clearance added when resolving an existing overlap.
const PUSH_OUT_MARGIN: f32 = 1e-3;

/// Passes over the obstacle list before an overlap is declared unresolvable.
const PUSH_OUT_PASSES: usize = 8;

/// Default node cap for snapshots returned by tools.
pub const DEFAULT_SNAPSHOT_NODES: usize = 200;

/// Registry shared by the scene construction code, the player mover and
/// the tool callbacks.
pub type SharedWorld = Rc<RefCell<WorldRegistry>>;

// ---------------------------------------------------------------------------
// Snapshot record
// ---------------------------------------------------------------------------

/// Value copy of one named node at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub position: [f32; 3],
    pub rotation: [f32; 3],
    pub scale: [f32; 3],
    #[serde(rename = "materialColor", skip_serializing_if = "Option::is_none")]
    pub material_color: Option<String>,
    pub children: usize,
}

/// An obstacle with a flat (ground-plane) collision circle.
#[derive(Debug, Clone, Copy)]
pub struct Collidable {
    pub node: NodeId,
    pub radius: f32,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct WorldRegistry {
    scene: Weak<RefCell<Scene>>,
    root: Option<NodeId>,
    labeled: HashMap<String, NodeId>,
    collidables: Vec<Collidable>,
}

impl WorldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedWorld {
        Rc::new(RefCell::new(self))
    }

    /// Point the registry at a new scene root for name lookup and snapshots.
    pub fn set_scene_root(&mut self, scene: &SharedScene, root: NodeId) {
        self.scene = Rc::downgrade(scene);
        self.root = Some(root);
    }

    /// Forget every label and collidable (call before re-registering a rebuilt scene).
    pub fn clear(&mut self) {
        self.labeled.clear();
        self.collidables.clear();
    }

    /// The live scene, if it has not been torn down.
    pub fn scene(&self) -> Option<SharedScene> {
        self.scene.upgrade()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Run `f` against the live scene. `None` if the scene is gone or is
    /// currently mutably borrowed.
    fn with_scene<R>(&self, f: impl FnOnce(&Scene) -> R) -> Option<R> {
        let scene = self.scene.upgrade()?;
        let guard = scene.try_borrow().ok()?;
        Some(f(&guard))
    }

    // -----------------------------------------------------------------------
    // Labels
    // -----------------------------------------------------------------------

    /// Associate a case-insensitive label with a node. Last writer wins.
    pub fn register_object(&mut self, label: &str, node: Option<NodeId>) {
        let Some(node) = node else { return };
        self.labeled.insert(label.to_lowercase(), node);
    }

    /// Resolve a label: explicit labels first, then node names in the tree.
    pub fn get_object_by_label(&self, label: &str) -> Option<NodeId> {
        let scene = self.scene.upgrade()?;
        let scene = scene.try_borrow().ok()?;

        if let Some(id) = self.labeled.get(&label.to_lowercase()) {
            if scene.contains(*id) {
                return Some(*id);
            }
        }

        let root = self.root?;
        scene.find_by_name(root, label).or_else(|| {
            scene.traverse(root).into_iter().find(|id| {
                scene
                    .get(*id)
                    .is_some_and(|n| !n.name.is_empty() && n.name.eq_ignore_ascii_case(label))
            })
        })
    }

    // -----------------------------------------------------------------------
    // Collision
    // -----------------------------------------------------------------------

    pub fn register_collidable(&mut self, node: NodeId, radius: f32) {
        if !(radius.is_finite() && radius > 0.0) {
            warn!("Ignoring collidable with non-positive radius {}", radius);
            return;
        }
        self.collidables.push(Collidable { node, radius });
    }

    pub fn collidables(&self) -> &[Collidable] {
        &self.collidables
    }

    /// True if `position` overlaps any visible obstacle on the ground plane.
    ///
    /// Obstacle positions are read from the scene on every call. A torn-down
    /// scene has no obstacles; a scene that is mid-mutation blocks everything.
    pub fn check_collision(&self, position: Vec3, player_radius: f32) -> bool {
        let Some(scene) = self.scene.upgrade() else {
            return false;
        };
        let Ok(scene) = scene.try_borrow() else {
            warn!("Scene busy during collision check at {}; treating as blocked", position);
            return true;
        };
        self.collidables.iter().any(|c| {
            if !scene.is_visible(c.node) {
                return false;
            }
            match scene.world_position(c.node) {
                Some(obstacle) => position.planar_distance(obstacle) < player_radius + c.radius,
                None => false,
            }
        })
    }

    /// Collision-free position closest in intent to `target`.
    ///
    /// Tries the target, then sliding along x only, then along z only, and
    /// otherwise stays at `current`. A `current` that already overlaps an
    /// obstacle is pushed out to contact distance instead, unless no
    /// collision-free spot is reached that way.
    pub fn get_valid_position(&self, target: Vec3, current: Vec3, player_radius: f32) -> Vec3 {
        if !self.check_collision(target, player_radius) {
            return target;
        }

        let x_only = Vec3::new(target.x, target.y, current.z);
        if !self.check_collision(x_only, player_radius) {
            return x_only;
        }

        let z_only = Vec3::new(current.x, target.y, target.z);
        if !self.check_collision(z_only, player_radius) {
            return z_only;
        }

        if self.check_collision(current, player_radius) {
            return self.push_out(current, player_radius).unwrap_or(current);
        }
        current
    }

    /// Repeatedly move `position` radially out of each overlapping obstacle,
    /// in registration order, until it is clear. `None` if obstacles keep
    /// pushing it back into each other.
    fn push_out(&self, position: Vec3, player_radius: f32) -> Option<Vec3> {
        let mut p = position;
        for _ in 0..PUSH_OUT_PASSES {
            p = self.push_out_once(p, player_radius)?;
            if !self.check_collision(p, player_radius) {
                debug!("Pushed player out of obstacles to {}", p);
                return Some(p);
            }
        }
        warn!("Could not push player at {} clear of obstacles", position);
        None
    }

    fn push_out_once(&self, position: Vec3, player_radius: f32) -> Option<Vec3> {
        self.with_scene(|scene| {
            let mut p = position;
            for c in &self.collidables {
                if !scene.is_visible(c.node) {
                    continue;
                }
                let Some(o) = scene.world_position(c.node) else {
                    continue;
                };
                let contact = player_radius + c.radius;
                let d = p.planar_distance(o);
                if d >= contact {
                    continue;
                }
                let (nx, nz) = if d > f32::EPSILON {
                    ((p.x - o.x) / d, (p.z - o.z) / d)
                } else {
                    (1.0, 0.0)
                };
                let reach = contact + PUSH_OUT_MARGIN;
                p = Vec3::new(o.x + nx * reach, p.y, o.z + nz * reach);
            }
            p
        })
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Summaries of up to `max_nodes` named nodes, in traversal order.
    pub fn get_snapshot(&self, max_nodes: usize) -> Vec<NodeSummary> {
        let Some(root) = self.root else {
            return Vec::new();
        };

        self.with_scene(|scene| {
            let mut out = Vec::new();
            for id in scene.traverse(root) {
                if out.len() >= max_nodes {
                    break;
                }
                // Nodes may vanish between traversal and summary.
                let Some(node) = scene.get(id) else { continue };
                if node.name.is_empty() {
                    continue;
                }
                let Some(t) = scene.world_transform(id) else {
                    continue;
                };
                out.push(NodeSummary {
                    name: node.name.clone(),
                    kind: node.kind.as_str().to_string(),
                    position: t.position.rounded(),
                    rotation: t.rotation.rounded(),
                    scale: t.scale.rounded(),
                    material_color: node.material_color().map(|c| c.to_hex()),
                    children: node.children().len(),
                });
            }
            out
        })
        .unwrap_or_default()
    }

    /// Snapshot JSON between sentinel markers, for embedding in a turn.
    pub fn get_snapshot_text(&self, max_nodes: usize) -> String {
        let snapshot = self.get_snapshot(max_nodes);
        match serde_json::to_string(&snapshot) {
            Ok(json) => {
                debug!("World snapshot: {} nodes, {} bytes", snapshot.len(), json.len());
                format!("{}\n{}\n{}", SNAPSHOT_START, json, SNAPSHOT_END)
            }
            Err(e) => {
                warn!("Failed to serialise world snapshot: {}", e);
                empty_snapshot_text()
            }
        }
    }
}

pub fn empty_snapshot_text() -> String {
    format!("{}\n[]\n{}", SNAPSHOT_START, SNAPSHOT_END)
}
