//! Escape-room tool tests, driven through the tool registry

#[cfg(test)]
mod tests {
    use detective_live::{
        escape_room::{EscapeRoom, MoveStep, LIGHT_RANGE, PICKUP_RANGE},
        protocol::ToolResult,
        tools::ToolRegistry,
        types::Vec3,
        world::PLAYER_RADIUS,
    };
    use serde_json::{json, Value};

    const DT: f32 = 0.1;

    fn setup() -> (EscapeRoom, ToolRegistry) {
        let room = EscapeRoom::build();
        let mut tools = ToolRegistry::new();
        room.register_tools(&mut tools);
        (room, tools)
    }

    fn call(tools: &ToolRegistry, name: &str, args: Value) -> ToolResult {
        tools.call(name, &args)
    }

    fn close_to(a: Vec3, b: Vec3) -> bool {
        a.planar_distance(b) < 0.02
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    #[test]
    fn every_game_tool_is_registered() {
        let (_room, tools) = setup();
        assert_eq!(tools.len(), 12);
    }

    #[test]
    fn missing_arguments_become_error_results() {
        let (_room, tools) = setup();
        let result = call(&tools, "inspectObject", json!({}));
        assert!(!result.success);
        assert!(result.get("error").is_some());
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    #[test]
    fn snapshot_and_listing_agree() {
        let (_room, tools) = setup();
        let snapshot = call(&tools, "getSceneSnapshot", Value::Null);
        let listing = call(&tools, "listSceneObjects", Value::Null);

        assert!(snapshot.success);
        let count = snapshot.get("objectCount").unwrap().as_u64().unwrap();
        assert_eq!(snapshot.get("objects").unwrap().as_array().unwrap().len() as u64, count);
        assert_eq!(listing.get("count").unwrap().as_u64().unwrap(), count);

        let names: Vec<_> = listing
            .get("objects")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["name"].as_str().unwrap().to_string())
            .collect();
        for expected in ["bedroom", "desk", "bed", "drawer", "match", "campfire", "player"] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }

    #[test]
    fn object_info_reports_world_transform() {
        let (_room, tools) = setup();
        let info = call(&tools, "getObjectInfo", json!({ "objectName": "desk_top" }));
        assert!(info.success);
        assert_eq!(info.get("type").unwrap(), "Mesh");
        assert_eq!(info.get("position").unwrap(), &json!([-3.0, 0.75, -2.0]));
        assert_eq!(info.get("color").unwrap(), "#8b4513");

        let group = call(&tools, "getObjectInfo", json!({ "objectName": "DESK" }));
        assert!(group.success);
        assert!(group.get("color").is_none());

        let missing = call(&tools, "getObjectInfo", json!({ "objectName": "window" }));
        assert!(!missing.success);
    }

    // -----------------------------------------------------------------------
    // Scene edits
    // -----------------------------------------------------------------------

    #[test]
    fn color_change_on_group_reaches_its_meshes() {
        let (_room, tools) = setup();
        let result = call(
            &tools,
            "changeObjectColor",
            json!({ "objectName": "desk", "color": "red" }),
        );
        assert!(result.success);

        for part in ["desk_top", "desk_papers"] {
            let info = call(&tools, "getObjectInfo", json!({ "objectName": part }));
            assert_eq!(info.get("color").unwrap(), "#ff0000", "{}", part);
        }

        let hex = call(
            &tools,
            "changeObjectColor",
            json!({ "objectName": "bed", "color": "#00aa00" }),
        );
        assert!(hex.success);
        let bed = call(&tools, "getObjectInfo", json!({ "objectName": "bed" }));
        assert_eq!(bed.get("color").unwrap(), "#00aa00");

        let bad = call(
            &tools,
            "changeObjectColor",
            json!({ "objectName": "bed", "color": "plaid" }),
        );
        assert!(!bad.success);
    }

    #[test]
    fn rotate_flip_and_reset() {
        let (_room, tools) = setup();
        assert!(call(&tools, "rotateObject", json!({ "objectName": "bed", "action": "flip" })).success);
        let flipped = call(&tools, "getObjectInfo", json!({ "objectName": "bed" }));
        let x = flipped.get("rotation").unwrap()[0].as_f64().unwrap();
        assert!((x - std::f64::consts::PI).abs() < 1e-3);

        assert!(call(&tools, "rotateObject", json!({ "objectName": "bed", "action": "reset" })).success);
        let reset = call(&tools, "getObjectInfo", json!({ "objectName": "bed" }));
        assert_eq!(reset.get("rotation").unwrap(), &json!([0.0, 0.0, 0.0]));

        let unknown = call(&tools, "rotateObject", json!({ "objectName": "bed", "action": "wobble" }));
        assert!(!unknown.success);
    }

    // -----------------------------------------------------------------------
    // Movement
    // -----------------------------------------------------------------------

    #[test]
    fn move_player_to_coordinates() {
        let (room, tools) = setup();
        let result = call(&tools, "movePlayer", json!({ "target": "walk to 1, 0, 1" }));
        assert!(result.success);
        assert_eq!(room.move_target(), Some(Vec3::new(1.0, 0.0, 1.0)));

        assert_eq!(room.run_until_idle(DT, 200), MoveStep::Arrived);
        assert!(close_to(room.player_position(), Vec3::new(1.0, 0.0, 1.0)));
    }

    #[test]
    fn move_player_toward_obstacle_stops_outside_it() {
        let (room, tools) = setup();
        assert!(call(&tools, "movePlayer", json!({ "target": "desk" })).success);

        room.run_until_idle(0.05, 2_000);

        let desk = Vec3::new(-3.0, 0.0, -2.0);
        let player = room.player_position();
        assert!(player.planar_distance(desk) >= 1.5 - 1e-4, "ended at {}", player);
        assert!(!room.world().borrow().check_collision(player, PLAYER_RADIUS));
    }

    #[test]
    fn unknown_move_target_fails() {
        let (room, tools) = setup();
        let result = call(&tools, "movePlayer", json!({ "target": "the moon" }));
        assert!(!result.success);
        assert_eq!(room.move_target(), None);
    }

    // -----------------------------------------------------------------------
    // Game flow
    // -----------------------------------------------------------------------

    #[test]
    fn pickup_out_of_range_walks_closer_then_succeeds() {
        let (room, tools) = setup();
        room.place_player(Vec3::new(-1.0, 0.0, 0.0));

        let first = call(&tools, "pickupObject", json!({ "objectName": "match" }));
        assert!(!first.success);
        assert!(first.needs_retry);
        assert!(room.inventory().is_empty());
        assert!(room.move_target().is_some());

        assert_eq!(room.run_until_idle(DT, 500), MoveStep::Arrived);
        let matchstick = Vec3::new(4.0, 0.8, 0.0);
        assert!(room.player_position().planar_distance(matchstick) <= PICKUP_RANGE);

        let second = call(&tools, "pickupObject", json!({ "objectName": "match" }));
        assert!(second.success, "{:?}", second.message);
        assert_eq!(second.get("inventory").unwrap(), &json!(["match"]));
        assert_eq!(room.inventory(), vec!["match"]);

        let node = room.lookup("match").unwrap();
        assert!(!room.is_visible(node));

        let again = call(&tools, "pickupObject", json!({ "objectName": "Match" }));
        assert!(!again.success);
        assert!(!again.needs_retry);
    }

    #[test]
    fn pickup_unknown_object_fails() {
        let (_room, tools) = setup();
        let result = call(&tools, "pickupObject", json!({ "objectName": "crown" }));
        assert!(!result.success);
        assert!(!result.needs_retry);
    }

    #[test]
    fn campfire_needs_a_match() {
        let (room, tools) = setup();
        room.place_player(Vec3::new(0.0, 0.0, 2.8));

        let result = call(&tools, "lightCampfire", Value::Null);
        assert!(!result.success);
        assert!(!result.needs_retry);
        assert!(!room.campfire_lit());
        assert_eq!(room.move_target(), None);
    }

    #[test]
    fn full_escape_sequence_lights_the_campfire() {
        let (room, tools) = setup();

        assert!(call(&tools, "pickupObject", json!({ "objectName": "match" })).needs_retry);
        room.run_until_idle(DT, 500);
        assert!(call(&tools, "pickupObject", json!({ "objectName": "match" })).success);

        let far = call(&tools, "lightCampfire", Value::Null);
        assert!(far.needs_retry);
        assert_eq!(room.run_until_idle(DT, 500), MoveStep::Arrived);
        let pit = Vec3::new(0.0, 0.0, 4.0);
        assert!(room.player_position().planar_distance(pit) <= LIGHT_RANGE);

        let lit = call(&tools, "lightCampfire", Value::Null);
        assert!(lit.success, "{:?}", lit.message);
        assert!(room.campfire_lit());

        let inspect = call(&tools, "inspectObject", json!({ "objectName": "campfire" }));
        let description = inspect.get("description").unwrap().as_str().unwrap();
        assert!(description.contains("otherworldly glow"));
    }

    #[test]
    fn clues_are_recorded_once() {
        let (room, tools) = setup();
        let args = json!({ "clueId": "letter", "clueText": "A torn letter mentions the fire." });

        assert!(call(&tools, "unlockClue", args.clone()).success);
        assert!(call(&tools, "unlockClue", args).success);

        let clues = room.clues();
        assert_eq!(clues.len(), 1);
        assert_eq!(clues[0].clue_id, "letter");
    }

    #[test]
    fn inventory_reports_items() {
        let (room, tools) = setup();
        let empty = call(&tools, "checkInventory", Value::Null);
        assert!(empty.success);
        assert_eq!(empty.get("itemCount").unwrap(), 0);

        room.place_player(Vec3::new(3.5, 0.0, 0.5));
        assert!(call(&tools, "pickupObject", json!({ "objectName": "match" })).success);

        let full = call(&tools, "checkInventory", Value::Null);
        assert_eq!(full.get("itemCount").unwrap(), 1);
        assert!(full.message.unwrap().contains("match"));
    }

    #[test]
    fn rebuilding_into_same_world_reindexes() {
        let room = EscapeRoom::build();
        let world = room.world().clone();
        drop(room);
        assert_eq!(world.borrow().get_object_by_label("desk"), None);

        let rebuilt = EscapeRoom::build_with(world.clone());
        assert!(world.borrow().get_object_by_label("desk").is_some());
        assert_eq!(world.borrow().collidables().len(), 4);
        assert_eq!(rebuilt.lookup("campfire_fire").map(|id| rebuilt.is_visible(id)), Some(false));
    }
}
