//! Scene graph: the live node tree the agent inspects and mutates.
//!
//! This is the narrow slice of a rendering layer the bridge needs: named
//! nodes with local transforms, visibility, and (for meshes) materials with
//! a color. Nodes live in an arena and are addressed by [`NodeId`]; removing
//! a node leaves a tombstone so stale ids resolve to `None` instead of
//! aliasing a newer node.

use crate::types::{Color, Euler, Quat, Vec3};
use std::cell::RefCell;
use std::rc::Rc;

/// Scene shared between the construction code, the player mover and tools.
pub type SharedScene = Rc<RefCell<Scene>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Scene,
    Group,
    Mesh,
    Light,
    Camera,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Scene => "Scene",
            NodeKind::Group => "Group",
            NodeKind::Mesh => "Mesh",
            NodeKind::Light => "Light",
            NodeKind::Camera => "Camera",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub color: Option<Color>,
}

impl Material {
    pub fn colored(color: Color) -> Self {
        Self { color: Some(color) }
    }
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub kind: NodeKind,
    pub position: Vec3,
    pub rotation: Euler,
    pub scale: Vec3,
    pub visible: bool,
    pub materials: Vec<Material>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            position: Vec3::zero(),
            rotation: Euler::default(),
            scale: Vec3::one(),
            visible: true,
            materials: Vec::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn mesh(name: impl Into<String>, color: Color) -> Self {
        let mut node = Self::new(name, NodeKind::Mesh);
        node.materials.push(Material::colored(color));
        node
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// The first material color, if this is a mesh that has one.
    pub fn material_color(&self) -> Option<Color> {
        if self.kind != NodeKind::Mesh {
            return None;
        }
        self.materials.iter().find_map(|m| m.color)
    }
}

/// World-space decomposition of a node's transform.
#[derive(Debug, Clone, Copy)]
pub struct WorldTransform {
    pub position: Vec3,
    pub rotation: Euler,
    pub scale: Vec3,
}

#[derive(Debug, Default)]
pub struct Scene {
    nodes: Vec<Option<SceneNode>>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedScene {
        Rc::new(RefCell::new(self))
    }

    /// Insert a root-level node.
    pub fn add(&mut self, node: SceneNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(node));
        id
    }

    /// Insert `node` under `parent`. A stale parent leaves the node detached.
    pub fn add_child(&mut self, parent: NodeId, mut node: SceneNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        if let Some(p) = self.get_mut(parent) {
            p.children.push(id);
            node.parent = Some(parent);
        }
        self.nodes.push(Some(node));
        id
    }

    /// Remove a node and its whole subtree.
    pub fn remove(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id.0).and_then(Option::take) else {
            return;
        };
        if let Some(parent) = node.parent.and_then(|p| self.get_mut(p)) {
            parent.children.retain(|c| *c != id);
        }
        for child in node.children {
            self.remove(child);
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Depth-first, pre-order ids of `root` and its descendants.
    ///
    /// Ids that no longer resolve are skipped.
    pub fn traverse(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.get(id) else { continue };
            out.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// First node in the subtree of `root` whose name matches exactly.
    pub fn find_by_name(&self, root: NodeId, name: &str) -> Option<NodeId> {
        self.traverse(root)
            .into_iter()
            .find(|id| self.get(*id).is_some_and(|n| n.name == name))
    }

    /// Compose local transforms from the root down to `id`.
    pub fn world_transform(&self, id: NodeId) -> Option<WorldTransform> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            let node = self.get(c)?;
            chain.push(node);
            cursor = node.parent;
        }

        let mut position = Vec3::zero();
        let mut rotation = Quat::identity();
        let mut scale = Vec3::one();
        for node in chain.into_iter().rev() {
            position = position.add(rotation.rotate(scale.mul(node.position)));
            rotation = rotation.mul(Quat::from_euler(node.rotation));
            scale = scale.mul(node.scale);
        }

        Some(WorldTransform {
            position,
            rotation: rotation.to_euler(),
            scale,
        })
    }

    pub fn world_position(&self, id: NodeId) -> Option<Vec3> {
        self.world_transform(id).map(|t| t.position)
    }

    /// A node is shown only if it and all of its ancestors are visible.
    pub fn is_visible(&self, id: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            match self.get(c) {
                Some(node) if node.visible => cursor = node.parent,
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_world_position_includes_parent_offset() {
        let mut scene = Scene::new();
        let root = scene.add(SceneNode::new("root", NodeKind::Scene));
        let group = scene.add_child(
            root,
            SceneNode::new("table", NodeKind::Group).at(Vec3::new(2.0, 0.0, 1.0)),
        );
        let cup = scene.add_child(
            group,
            SceneNode::mesh("cup", Color(0xffffff)).at(Vec3::new(0.5, 1.0, 0.0)),
        );
        let pos = scene.world_position(cup).unwrap();
        assert!((pos.x - 2.5).abs() < 1e-5);
        assert!((pos.y - 1.0).abs() < 1e-5);
        assert!((pos.z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn removed_subtree_is_skipped_by_traversal() {
        let mut scene = Scene::new();
        let root = scene.add(SceneNode::new("root", NodeKind::Scene));
        let a = scene.add_child(root, SceneNode::new("a", NodeKind::Group));
        let b = scene.add_child(a, SceneNode::new("b", NodeKind::Group));
        scene.add_child(root, SceneNode::new("c", NodeKind::Group));

        scene.remove(a);
        assert!(!scene.contains(b));
        let names: Vec<_> = scene
            .traverse(root)
            .into_iter()
            .map(|id| scene.get(id).unwrap().name.clone())
            .collect();
        assert_eq!(names, vec!["root", "c"]);
    }

    #[test]
    fn hidden_parent_hides_children() {
        let mut scene = Scene::new();
        let root = scene.add(SceneNode::new("root", NodeKind::Scene));
        let pit = scene.add_child(root, SceneNode::new("pit", NodeKind::Group).hidden());
        let flame = scene.add_child(pit, SceneNode::mesh("flame", Color(0xff8800)));
        assert!(!scene.is_visible(flame));
        scene.get_mut(pit).unwrap().visible = true;
        assert!(scene.is_visible(flame));
    }

    #[test]
    fn material_color_only_for_meshes() {
        let mut group = SceneNode::new("g", NodeKind::Group);
        group.materials.push(Material::colored(Color(0x123456)));
        assert_eq!(group.material_color(), None);
        assert_eq!(
            SceneNode::mesh("m", Color(0x123456)).material_color(),
            Some(Color(0x123456))
        );
    }
}
