//! Lady Eleanor's bedroom: the game-side half of the tool bridge.
//!
//! [`EscapeRoom`] builds the scene, registers labels and obstacles with the
//! world registry, walks the player toward move targets, and supplies the
//! callbacks behind every game tool. It is a bundle of shared handles, so
//! clones captured by tool callbacks all see the same room.

use crate::error::ToolError;
use crate::protocol::ToolResult;
use crate::scene::{NodeId, NodeKind, SceneNode, Scene, SharedScene};
use crate::tools::{str_arg, ToolName, ToolRegistry};
use crate::types::{Color, Euler, Vec3};
use crate::world::{SharedWorld, WorldRegistry, DEFAULT_SNAPSHOT_NODES, PLAYER_RADIUS};
use log::{debug, info};
use serde::Serialize;
use serde_json::Value;
use std::cell::RefCell;
use std::f32::consts::PI;
use std::rc::Rc;

pub const PICKUP_RANGE: f32 = 2.5;
pub const PICKUP_APPROACH: f32 = 0.8;
pub const LIGHT_RANGE: f32 = 1.5;
pub const LIGHT_APPROACH: f32 = 1.2;

/// Units per second.
pub const DEFAULT_PLAYER_SPEED: f32 = 1.0;
const ARRIVAL_EPSILON: f32 = 0.01;

/// Inspection texts, matched by substring in this order.
const DESCRIPTIONS: [(&str, &str); 5] = [
    (
        "bed",
        "an ornate four-poster bed with velvet drapes. the bedding is disturbed, as if someone left in a hurry.",
    ),
    (
        "desk",
        "a mahogany writing desk with intricate carvings. several papers are scattered across its surface.",
    ),
    (
        "drawer",
        "a tall wooden drawer with brass handles. one drawer is slightly ajar.",
    ),
    ("campfire", ""),
    (
        "match",
        "a simple wooden match. it could be used to light something.",
    ),
];

const CAMPFIRE_LIT: &str =
    "a mystical campfire that burns with an otherworldly glow, casting dancing shadows across the room.";
const CAMPFIRE_UNLIT: &str = "a dark campfire pit, unlit. you would need a match to light it.";

// ---------------------------------------------------------------------------
// Game state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Clue {
    pub clue_id: String,
    pub clue_text: String,
}

#[derive(Debug, Default)]
pub struct GameState {
    pub inventory: Vec<String>,
    pub clues: Vec<Clue>,
}

impl GameState {
    pub fn has(&self, item: &str) -> bool {
        self.inventory.iter().any(|i| i == item)
    }

    pub fn has_match(&self) -> bool {
        self.has("match") || self.has("match_object")
    }
}

/// Result of one movement frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStep {
    Idle,
    Moving,
    /// Collision resolution kept the player in place; the target is kept.
    Blocked,
    Arrived,
}

#[derive(Debug)]
struct PlayerMover {
    target: Option<Vec3>,
    speed: f32,
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EscapeRoom {
    scene: SharedScene,
    world: SharedWorld,
    root: NodeId,
    player: NodeId,
    mover: Rc<RefCell<PlayerMover>>,
    state: Rc<RefCell<GameState>>,
}

impl EscapeRoom {
    /// Build the bedroom and register it with a fresh world registry.
    pub fn build() -> Self {
        Self::build_with(WorldRegistry::new().shared())
    }

    /// Build the bedroom into `world`, replacing whatever it indexed before.
    pub fn build_with(world: SharedWorld) -> Self {
        let mut scene = Scene::new();
        let root = scene.add(SceneNode::new("bedroom", NodeKind::Scene));

        let desk = scene.add_child(
            root,
            SceneNode::new("desk", NodeKind::Group).at(Vec3::new(-3.0, 0.0, -2.0)),
        );
        scene.add_child(
            desk,
            SceneNode::mesh("desk_top", Color(0x8b4513)).at(Vec3::new(0.0, 0.75, 0.0)),
        );
        scene.add_child(
            desk,
            SceneNode::mesh("desk_papers", Color(0xf5f5dc)).at(Vec3::new(0.2, 0.8, 0.1)),
        );
        let bed = scene.add_child(
            root,
            SceneNode::mesh("bed", Color(0x800020)).at(Vec3::new(3.0, 0.0, -3.0)),
        );
        let drawer = scene.add_child(
            root,
            SceneNode::mesh("drawer", Color(0x5c4033)).at(Vec3::new(-4.0, 0.0, 2.0)),
        );
        let matchstick = scene.add_child(
            root,
            SceneNode::mesh("match", Color(0xdeb887)).at(Vec3::new(4.0, 0.8, 0.0)),
        );
        let campfire = scene.add_child(
            root,
            SceneNode::new("campfire", NodeKind::Group).at(Vec3::new(0.0, 0.0, 4.0)),
        );
        scene.add_child(campfire, SceneNode::mesh("campfire_logs", Color(0x4a3728)));
        let fire = scene.add_child(
            campfire,
            SceneNode::mesh("campfire_fire", Color(0xff8800))
                .at(Vec3::new(0.0, 0.3, 0.0))
                .hidden(),
        );
        scene.add_child(root, SceneNode::new("fire_light", NodeKind::Light).at(Vec3::new(0.0, 1.0, 4.0)));
        let player = scene.add_child(root, SceneNode::new("player", NodeKind::Group));
        scene.add_child(
            player,
            SceneNode::mesh("player_body", Color(0x2f4f4f)).at(Vec3::new(0.0, 0.9, 0.0)),
        );

        let scene = scene.shared();
        {
            let mut w = world.borrow_mut();
            w.clear();
            w.set_scene_root(&scene, root);
            for (label, node) in [
                ("desk", desk),
                ("bed", bed),
                ("drawer", drawer),
                ("match", matchstick),
                ("campfire", campfire),
                ("campfire_fire", fire),
                ("player", player),
            ] {
                w.register_object(label, Some(node));
            }
            w.register_collidable(desk, 1.0);
            w.register_collidable(bed, 1.2);
            w.register_collidable(drawer, 0.6);
            w.register_collidable(campfire, 0.6);
        }
        info!("Bedroom built");

        Self {
            scene,
            world,
            root,
            player,
            mover: Rc::new(RefCell::new(PlayerMover {
                target: None,
                speed: DEFAULT_PLAYER_SPEED,
            })),
            state: Rc::new(RefCell::new(GameState::default())),
        }
    }

    pub fn scene(&self) -> &SharedScene {
        &self.scene
    }

    pub fn world(&self) -> &SharedWorld {
        &self.world
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn player(&self) -> NodeId {
        self.player
    }

    pub fn inventory(&self) -> Vec<String> {
        self.state.borrow().inventory.clone()
    }

    pub fn clues(&self) -> Vec<Clue> {
        self.state.borrow().clues.clone()
    }

    pub fn lookup(&self, label: &str) -> Option<NodeId> {
        self.world.borrow().get_object_by_label(label)
    }

    pub fn is_visible(&self, node: NodeId) -> bool {
        self.scene.borrow().is_visible(node)
    }

    pub fn campfire_lit(&self) -> bool {
        self.lookup("campfire_fire").is_some_and(|fire| self.is_visible(fire))
    }

    // -----------------------------------------------------------------------
    // Player movement
    // -----------------------------------------------------------------------

    pub fn player_position(&self) -> Vec3 {
        self.scene
            .borrow()
            .world_position(self.player)
            .unwrap_or_default()
    }

    /// Teleport, dropping any move target.
    pub fn place_player(&self, position: Vec3) {
        self.mover.borrow_mut().target = None;
        if let Some(node) = self.scene.borrow_mut().get_mut(self.player) {
            node.position = position;
        }
    }

    pub fn move_to(&self, target: Vec3) {
        debug!("Player heading to {}", target);
        self.mover.borrow_mut().target = Some(target);
    }

    pub fn move_target(&self) -> Option<Vec3> {
        self.mover.borrow().target
    }

    /// Advance the player toward its target by one frame of `dt` seconds.
    pub fn step(&self, dt: f32) -> MoveStep {
        let (target, speed) = {
            let mover = self.mover.borrow();
            match mover.target {
                Some(t) => (t, mover.speed),
                None => return MoveStep::Idle,
            }
        };

        let current = self.player_position();
        let dx = target.x - current.x;
        let dz = target.z - current.z;
        let dist = dx.hypot(dz);
        if dist <= ARRIVAL_EPSILON {
            self.mover.borrow_mut().target = None;
            return MoveStep::Arrived;
        }

        let travel = (speed * dt).min(dist);
        let next = Vec3::new(
            current.x + dx / dist * travel,
            current.y,
            current.z + dz / dist * travel,
        );
        let valid = self
            .world
            .borrow()
            .get_valid_position(next, current, PLAYER_RADIUS);

        if let Some(node) = self.scene.borrow_mut().get_mut(self.player) {
            node.position = valid;
        }
        if valid == current {
            MoveStep::Blocked
        } else {
            MoveStep::Moving
        }
    }

    /// Step until the player arrives, stalls, or `max_steps` frames pass.
    pub fn run_until_idle(&self, dt: f32, max_steps: usize) -> MoveStep {
        let mut last = MoveStep::Idle;
        for _ in 0..max_steps {
            last = self.step(dt);
            if matches!(last, MoveStep::Idle | MoveStep::Arrived | MoveStep::Blocked) {
                break;
            }
        }
        last
    }

    // -----------------------------------------------------------------------
    // Tools
    // -----------------------------------------------------------------------

    /// Register every game tool's callback.
    pub fn register_tools(&self, registry: &mut ToolRegistry) {
        let tools: [(ToolName, fn(&EscapeRoom, &Value) -> Result<ToolResult, ToolError>); 12] = [
            (ToolName::GetSceneSnapshot, EscapeRoom::get_scene_snapshot),
            (ToolName::GetObjectInfo, EscapeRoom::get_object_info),
            (ToolName::GetPlayerPosition, EscapeRoom::get_player_position),
            (ToolName::ListSceneObjects, EscapeRoom::list_scene_objects),
            (ToolName::ChangeObjectColor, EscapeRoom::change_object_color),
            (ToolName::RotateObject, EscapeRoom::rotate_object),
            (ToolName::MovePlayer, EscapeRoom::move_player),
            (ToolName::InspectObject, EscapeRoom::inspect_object),
            (ToolName::UnlockClue, EscapeRoom::unlock_clue),
            (ToolName::PickupObject, EscapeRoom::pickup_object),
            (ToolName::LightCampfire, EscapeRoom::light_campfire),
            (ToolName::CheckInventory, EscapeRoom::check_inventory),
        ];
        for (tool, handler) in tools {
            let room = self.clone();
            registry.register(tool, move |args| handler(&room, args));
        }
    }

    pub fn get_scene_snapshot(&self, _args: &Value) -> Result<ToolResult, ToolError> {
        let snapshot = self.world.borrow().get_snapshot(DEFAULT_SNAPSHOT_NODES);
        Ok(ToolResult::ok()
            .with("objectCount", snapshot.len())
            .with("objects", snapshot))
    }

    pub fn get_object_info(&self, args: &Value) -> Result<ToolResult, ToolError> {
        let name = str_arg(args, "objectName")?;
        let Some(id) = self.lookup(name) else {
            return Ok(not_found(name));
        };
        let scene = self.scene.borrow();
        let (Some(node), Some(t)) = (scene.get(id), scene.world_transform(id)) else {
            return Ok(not_found(name));
        };

        let mut result = ToolResult::ok()
            .with("objectName", name)
            .with("type", node.kind.as_str())
            .with("position", t.position.rounded())
            .with("rotation", node.rotation.rounded())
            .with("scale", t.scale.rounded());
        if let Some(color) = node.material_color() {
            result = result.with("color", color.to_hex());
        }
        Ok(result)
    }

    pub fn get_player_position(&self, _args: &Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::ok().with("position", self.player_position().rounded()))
    }

    pub fn list_scene_objects(&self, _args: &Value) -> Result<ToolResult, ToolError> {
        let objects: Vec<Value> = self
            .world
            .borrow()
            .get_snapshot(DEFAULT_SNAPSHOT_NODES)
            .into_iter()
            .map(|n| serde_json::json!({ "name": n.name, "type": n.kind, "position": n.position }))
            .collect();
        Ok(ToolResult::ok()
            .with("count", objects.len())
            .with("objects", objects))
    }

    pub fn change_object_color(&self, args: &Value) -> Result<ToolResult, ToolError> {
        let name = str_arg(args, "objectName")?;
        let color_name = str_arg(args, "color")?;
        let Some(id) = self.lookup(name) else {
            return Ok(not_found(name));
        };
        let Some(color) = Color::parse(color_name) else {
            return Ok(ToolResult::failure(format!("unknown color '{}'", color_name)));
        };

        let mut scene = self.scene.borrow_mut();
        let is_mesh = scene.get(id).is_some_and(|n| n.kind == NodeKind::Mesh);
        let targets = if is_mesh { vec![id] } else { scene.traverse(id) };

        let mut changed = false;
        for target in targets {
            let Some(node) = scene.get_mut(target) else { continue };
            if node.kind != NodeKind::Mesh {
                continue;
            }
            for material in node.materials.iter_mut().filter(|m| m.color.is_some()) {
                material.color = Some(color);
                changed = true;
            }
        }

        if changed {
            Ok(ToolResult::success(format!("changed {} to {}", name, color_name)))
        } else {
            Ok(ToolResult::failure(format!("could not change color of {}", name)))
        }
    }

    pub fn rotate_object(&self, args: &Value) -> Result<ToolResult, ToolError> {
        let name = str_arg(args, "objectName")?;
        let action = str_arg(args, "action")?;
        let Some(id) = self.lookup(name) else {
            return Ok(not_found(name));
        };

        let mut scene = self.scene.borrow_mut();
        let Some(node) = scene.get_mut(id) else {
            return Ok(not_found(name));
        };
        match action {
            "flip" => node.rotation.x += PI,
            "spin" => node.rotation.y += PI * 2.0,
            "reset" => node.rotation = Euler::default(),
            other => return Ok(ToolResult::failure(format!("unknown action '{}'", other))),
        }
        Ok(ToolResult::success(format!("{} {}", action, name)))
    }

    pub fn move_player(&self, args: &Value) -> Result<ToolResult, ToolError> {
        let target = str_arg(args, "target")?;

        if let Some(pos) = parse_coordinates(target) {
            self.move_to(pos);
            return Ok(ToolResult::success(format!(
                "moving player to coordinates {}, {}, {}",
                pos.x, pos.y, pos.z
            )));
        }

        let position = self
            .lookup(target)
            .and_then(|id| self.scene.borrow().world_position(id));
        match position {
            Some(pos) => {
                self.move_to(pos);
                Ok(ToolResult::success(format!("moving player to {}", target)))
            }
            None => Ok(ToolResult::failure(format!("unknown target '{}'", target))),
        }
    }

    pub fn inspect_object(&self, args: &Value) -> Result<ToolResult, ToolError> {
        let name = str_arg(args, "objectName")?;
        let lowered = name.to_lowercase();
        let Some((key, text)) = DESCRIPTIONS.iter().find(|(key, _)| lowered.contains(key)) else {
            return Ok(ToolResult::failure(format!("object '{}' not found", name)));
        };

        let description = if *key == "campfire" {
            if self.state.borrow().has_match() && self.campfire_lit() {
                CAMPFIRE_LIT
            } else {
                CAMPFIRE_UNLIT
            }
        } else {
            *text
        };

        Ok(ToolResult::ok()
            .with("objectName", key)
            .with("description", description))
    }

    pub fn unlock_clue(&self, args: &Value) -> Result<ToolResult, ToolError> {
        let clue_id = str_arg(args, "clueId")?;
        let clue_text = str_arg(args, "clueText")?;
        info!("Clue unlocked [{}]: {}", clue_id, clue_text);

        let mut state = self.state.borrow_mut();
        if !state.clues.iter().any(|c| c.clue_id == clue_id) {
            state.clues.push(Clue {
                clue_id: clue_id.to_string(),
                clue_text: clue_text.to_string(),
            });
        }
        Ok(ToolResult::success(format!("clue unlocked: {}", clue_text)).with("clueId", clue_id))
    }

    pub fn pickup_object(&self, args: &Value) -> Result<ToolResult, ToolError> {
        let name = str_arg(args, "objectName")?;
        let item = name.to_lowercase();
        let Some(id) = self.lookup(&item) else {
            return Ok(not_found(name));
        };
        if self.state.borrow().has(&item) {
            return Ok(ToolResult::failure(format!("you already have the {}", name)));
        }

        let Some(object) = self.scene.borrow().world_position(id) else {
            return Ok(not_found(name));
        };
        let player = self.player_position();
        if player.planar_distance(object) > PICKUP_RANGE {
            self.move_to(approach_point(player, object, PICKUP_APPROACH));
            return Ok(ToolResult::failure(format!(
                "moving closer to {} first. try picking it up again once you're near it.",
                name
            ))
            .retryable());
        }

        if let Some(node) = self.scene.borrow_mut().get_mut(id) {
            node.visible = false;
        }
        let inventory = {
            let mut state = self.state.borrow_mut();
            state.inventory.push(item);
            state.inventory.clone()
        };
        info!("Picked up {}", name);
        Ok(ToolResult::success(format!("picked up {}", name)).with("inventory", inventory))
    }

    pub fn light_campfire(&self, _args: &Value) -> Result<ToolResult, ToolError> {
        if !self.state.borrow().has_match() {
            return Ok(ToolResult::failure("you need a match to light the campfire"));
        }
        let (Some(campfire), Some(fire)) = (self.lookup("campfire"), self.lookup("campfire_fire")) else {
            return Ok(ToolResult::failure("campfire not found in the scene"));
        };
        let Some(pit) = self.scene.borrow().world_position(campfire) else {
            return Ok(ToolResult::failure("campfire not found in the scene"));
        };

        let player = self.player_position();
        if player.planar_distance(pit) > LIGHT_RANGE {
            self.move_to(approach_point(player, pit, LIGHT_APPROACH));
            return Ok(ToolResult::failure(
                "moving closer to the campfire first. try lighting it again once you're near it.",
            )
            .retryable());
        }

        let mut scene = self.scene.borrow_mut();
        for id in [campfire, fire] {
            if let Some(node) = scene.get_mut(id) {
                node.visible = true;
            }
        }
        info!("Campfire lit");
        Ok(ToolResult::success("the campfire ignites with a warm, flickering glow"))
    }

    pub fn check_inventory(&self, _args: &Value) -> Result<ToolResult, ToolError> {
        let inventory = self.inventory();
        let message = if inventory.is_empty() {
            "your inventory is empty".to_string()
        } else {
            format!("you are carrying: {}", inventory.join(", "))
        };
        Ok(ToolResult::success(message)
            .with("itemCount", inventory.len())
            .with("inventory", inventory))
    }
}

fn not_found(name: &str) -> ToolResult {
    ToolResult::failure(format!("object '{}' not found in world", name))
}

/// Point `distance` from `target` on the ground-plane line toward `from`.
fn approach_point(from: Vec3, target: Vec3, distance: f32) -> Vec3 {
    let dx = from.x - target.x;
    let dz = from.z - target.z;
    let len = dx.hypot(dz);
    if len <= f32::EPSILON {
        return target;
    }
    Vec3::new(
        target.x + dx / len * distance,
        target.y,
        target.z + dz / len * distance,
    )
}

/// First run of three numbers separated by commas and/or whitespace.
pub fn parse_coordinates(text: &str) -> Option<Vec3> {
    let tokens: Vec<&str> = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();
    tokens.windows(3).find_map(|w| {
        let x = parse_number(w[0])?;
        let y = parse_number(w[1])?;
        let z = parse_number(w[2])?;
        Some(Vec3::new(x, y, z))
    })
}

fn parse_number(token: &str) -> Option<f32> {
    let digits = token.strip_prefix('-').unwrap_or(token);
    let plain = digits.starts_with(|c: char| c.is_ascii_digit())
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.');
    if !plain {
        return None;
    }
    token.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_accept_commas_and_spaces() {
        assert_eq!(parse_coordinates("1,2,3"), Some(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(
            parse_coordinates("go to -1.5 0 2."),
            Some(Vec3::new(-1.5, 0.0, 2.0))
        );
        assert_eq!(parse_coordinates("4, 0 ,-2"), Some(Vec3::new(4.0, 0.0, -2.0)));
        assert_eq!(parse_coordinates("desk"), None);
        assert_eq!(parse_coordinates("1,2"), None);
        assert_eq!(parse_coordinates("nan inf 3"), None);
    }

    #[test]
    fn approach_point_sits_on_line_to_player() {
        let p = approach_point(Vec3::new(5.0, 0.0, 0.0), Vec3::new(1.0, 0.8, 0.0), 0.8);
        assert!((p.x - 1.8).abs() < 1e-6);
        assert_eq!(p.y, 0.8);
        assert_eq!(p.z, 0.0);
    }

    #[test]
    fn mover_does_not_overshoot() {
        let room = EscapeRoom::build();
        room.place_player(Vec3::new(0.0, 0.0, 0.0));
        room.move_to(Vec3::new(0.5, 0.0, 0.0));
        assert_eq!(room.step(1.0), MoveStep::Moving);
        assert_eq!(room.player_position(), Vec3::new(0.5, 0.0, 0.0));
        assert_eq!(room.step(1.0), MoveStep::Arrived);
        assert_eq!(room.step(1.0), MoveStep::Idle);
    }

    #[test]
    fn inspect_matches_by_substring() {
        let room = EscapeRoom::build();
        let result = room
            .inspect_object(&serde_json::json!({ "objectName": "the Old Desk" }))
            .unwrap();
        assert!(result.success);
        assert_eq!(result.get("objectName").unwrap(), "desk");

        let fire = room
            .inspect_object(&serde_json::json!({ "objectName": "campfire_fire" }))
            .unwrap();
        assert_eq!(fire.get("description").unwrap(), CAMPFIRE_UNLIT);

        let missing = room
            .inspect_object(&serde_json::json!({ "objectName": "window" }))
            .unwrap();
        assert!(!missing.success);
    }
}
