//! AgentSession tests against an in-memory connector

#[cfg(test)]
mod tests {
    use detective_live::{
        audio::{AudioScheduler, ClockedOutput, ManualClock},
        capture::RecordedUtterance,
        error::{ChannelError, SessionError, ToolError},
        escape_room::EscapeRoom,
        protocol::{
            ClientMessage, Content, FunctionCall, Part, ServerContent, ServerMessage, Setup,
            ToolCallBatch, ToolResult, Transcription, LANGUAGE_DIRECTIVE,
        },
        session::{
            AgentSession, Channel, ChannelEvent, ChannelId, CloseAction, Connector, Role,
            SessionEvent, SessionStatus, ThoughtPriority,
        },
        tools::{ToolName, ToolRegistry, NOT_IMPLEMENTED},
        types::SessionConfig,
        world::{WorldRegistry, SNAPSHOT_START},
    };
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::future::Future;
    use std::rc::Rc;

    // -----------------------------------------------------------------------
    // In-memory connector
    // -----------------------------------------------------------------------

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Behavior {
        Accept,
        Reject,
        Hang,
    }

    #[derive(Debug, Default)]
    struct Log {
        attempts: Vec<String>,
        setups: Vec<Setup>,
        sent: Vec<ClientMessage>,
        closed: usize,
        fail_sends: bool,
    }

    type SharedLog = Rc<RefCell<Log>>;

    struct FakeChannel {
        log: SharedLog,
    }

    impl Channel for FakeChannel {
        fn send(&mut self, message: ClientMessage) -> Result<(), ChannelError> {
            let mut log = self.log.borrow_mut();
            if log.fail_sends {
                return Err(ChannelError::Closed);
            }
            log.sent.push(message);
            Ok(())
        }

        fn close(&mut self) {
            self.log.borrow_mut().closed += 1;
        }
    }

    struct FakeConnector {
        behaviors: HashMap<String, Behavior>,
        log: SharedLog,
    }

    impl Connector for FakeConnector {
        type Channel = FakeChannel;

        fn open(
            &mut self,
            credential: &str,
            _id: ChannelId,
            setup: Setup,
        ) -> impl Future<Output = Result<FakeChannel, ChannelError>> {
            {
                let mut log = self.log.borrow_mut();
                log.attempts.push(credential.to_string());
                log.setups.push(setup);
            }
            let behavior = self
                .behaviors
                .get(credential)
                .copied()
                .unwrap_or(Behavior::Reject);
            let log = self.log.clone();
            async move {
                match behavior {
                    Behavior::Accept => Ok(FakeChannel { log }),
                    Behavior::Reject => Err(ChannelError::Rejected("API key not valid".into())),
                    Behavior::Hang => std::future::pending().await,
                }
            }
        }
    }

    fn make_session_with_world(
        keys: &[(&str, Behavior)],
        world: detective_live::SharedWorld,
    ) -> (AgentSession<FakeConnector>, SharedLog) {
        let log = SharedLog::default();
        let connector = FakeConnector {
            behaviors: keys.iter().map(|(k, b)| (k.to_string(), *b)).collect(),
            log: log.clone(),
        };
        let credentials = keys.iter().map(|(k, _)| k.to_string()).collect();
        let session = AgentSession::new(SessionConfig::default(), connector, credentials, world);
        (session, log)
    }

    fn make_session(keys: &[(&str, Behavior)]) -> (AgentSession<FakeConnector>, SharedLog) {
        make_session_with_world(keys, WorldRegistry::new().shared())
    }

    async fn connected_session() -> (AgentSession<FakeConnector>, SharedLog, ChannelId) {
        let (mut session, log) = make_session(&[("key-a", Behavior::Accept)]);
        session.connect().await.unwrap();
        let id = session.channel_id().unwrap();
        (session, log, id)
    }

    fn model_text(text: &str, turn_complete: bool) -> ServerMessage {
        ServerMessage {
            server_content: Some(ServerContent {
                model_turn: Some(Content {
                    role: Some("model".into()),
                    parts: vec![Part::text(text)],
                }),
                turn_complete,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn tool_calls(calls: &[(&str, &str, Value)]) -> ServerMessage {
        ServerMessage {
            tool_call: Some(ToolCallBatch {
                function_calls: calls
                    .iter()
                    .map(|(id, name, args)| FunctionCall {
                        id: id.to_string(),
                        name: name.to_string(),
                        args: args.clone(),
                    })
                    .collect(),
            }),
            ..Default::default()
        }
    }

    fn last_tool_results(log: &SharedLog) -> Vec<(String, ToolResult)> {
        match log.borrow().sent.last() {
            Some(ClientMessage::ToolResponse(r)) => r
                .function_responses
                .iter()
                .map(|f| (f.name.clone(), f.response.clone()))
                .collect(),
            other => panic!("expected a tool response, got {:?}", other),
        }
    }

    fn last_turn_parts(log: &SharedLog) -> Vec<Part> {
        match log.borrow().sent.last() {
            Some(ClientMessage::ClientContent(c)) => {
                assert_eq!(c.turns.len(), 1);
                assert!(c.turn_complete);
                c.turns[0].parts.clone()
            }
            other => panic!("expected client content, got {:?}", other),
        }
    }

    // -----------------------------------------------------------------------
    // Connecting
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn rotates_past_rejected_credentials() {
        let (mut session, log) = make_session(&[
            ("key-a", Behavior::Reject),
            ("key-b", Behavior::Reject),
            ("key-c", Behavior::Accept),
        ]);

        session.connect().await.unwrap();

        assert_eq!(session.status(), SessionStatus::Connected);
        assert_eq!(session.active_credential_index(), 2);
        assert_eq!(log.borrow().attempts, vec!["key-a", "key-b", "key-c"]);
        assert_eq!(session.channel_id(), Some(ChannelId(2)));
        assert!(session.connection_error().is_none());
    }

    #[tokio::test]
    async fn gives_up_after_one_attempt_per_credential() {
        let (mut session, log) = make_session(&[
            ("key-a", Behavior::Reject),
            ("key-b", Behavior::Reject),
            ("key-c", Behavior::Reject),
        ]);

        let err = session.connect().await.unwrap_err();

        assert!(matches!(err, SessionError::CredentialsExhausted { attempts: 3, .. }));
        assert_eq!(log.borrow().attempts.len(), 3);
        assert_eq!(session.status(), SessionStatus::Disconnected);
        assert!(session
            .connection_error()
            .unwrap()
            .starts_with("All 3 API keys failed"));
    }

    #[tokio::test]
    async fn reconnect_starts_from_last_good_credential() {
        let (mut session, log) = make_session(&[
            ("key-a", Behavior::Reject),
            ("key-b", Behavior::Accept),
        ]);
        session.connect().await.unwrap();
        session.disconnect();
        session.connect().await.unwrap();

        assert_eq!(log.borrow().attempts, vec!["key-a", "key-b", "key-b"]);
        assert_eq!(session.active_credential_index(), 1);
    }

    #[tokio::test]
    async fn connect_without_credentials_fails_fast() {
        let (mut session, log) = make_session(&[]);

        assert_eq!(session.connect().await, Err(SessionError::NoCredentials));
        assert!(log.borrow().attempts.is_empty());
        assert_eq!(session.status(), SessionStatus::Disconnected);
        assert!(session.connection_error().unwrap().contains("No valid API keys"));
    }

    #[tokio::test]
    async fn connect_while_connected_is_a_no_op() {
        let (mut session, log, id) = connected_session().await;

        session.connect().await.unwrap();

        assert_eq!(log.borrow().attempts.len(), 1);
        assert_eq!(session.channel_id(), Some(id));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_times_out_and_rotates() {
        let (mut session, log) = make_session(&[
            ("key-a", Behavior::Hang),
            ("key-b", Behavior::Accept),
        ]);
        let started = tokio::time::Instant::now();

        session.connect().await.unwrap();

        assert!(started.elapsed() >= SessionConfig::default().connect_timeout);
        assert_eq!(log.borrow().attempts, vec!["key-a", "key-b"]);
        assert_eq!(session.active_credential_index(), 1);
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn setup_declares_every_tool() {
        let (_session, log, _) = connected_session().await;
        let log = log.borrow();
        let setup = &log.setups[0];

        let names: Vec<_> = setup.tools[0]
            .function_declarations
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        for tool in ToolName::ALL {
            assert!(names.contains(&tool.as_str()), "missing {}", tool);
        }
        assert_eq!(setup.model, SessionConfig::default().model);
    }

    #[tokio::test]
    async fn status_events_trace_the_connection() {
        let (mut session, _log, _) = connected_session().await;
        let events = session.drain_events(16);
        assert_eq!(
            events,
            vec![
                SessionEvent::StatusChanged(SessionStatus::Connecting),
                SessionEvent::StatusChanged(SessionStatus::Connected),
            ]
        );
    }

    // -----------------------------------------------------------------------
    // Closing
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (mut session, log, id) = connected_session().await;

        session.disconnect();
        session.disconnect();

        assert_eq!(session.status(), SessionStatus::Disconnected);
        assert_eq!(log.borrow().closed, 1);
        assert!(!session.should_reconnect());
        assert_eq!(session.handle_close(id, "bye"), CloseAction::Ignored);
    }

    #[tokio::test]
    async fn stale_channel_events_are_ignored() {
        let (mut session, log, id) = connected_session().await;
        let stale = ChannelId(id.0 + 41);

        assert_eq!(
            session.handle_event(ChannelEvent::Closed {
                id: stale,
                reason: "API key not valid".into(),
            }),
            Some(CloseAction::Ignored)
        );
        session.handle_message(stale, tool_calls(&[("1", "checkInventory", json!({}))]));

        assert!(session.is_connected());
        assert!(log.borrow().sent.is_empty());
    }

    #[tokio::test]
    async fn plain_close_marks_session_down() {
        let (mut session, _log, id) = connected_session().await;

        assert_eq!(session.handle_close(id, "going away"), CloseAction::Closed);

        assert_eq!(session.status(), SessionStatus::Disconnected);
        assert_eq!(session.channel_id(), None);
        assert_eq!(session.connection_error(), Some("Connection closed: going away"));
    }

    #[tokio::test]
    async fn rejection_close_rotates_until_exhausted() {
        let (mut session, log) = make_session(&[
            ("key-a", Behavior::Accept),
            ("key-b", Behavior::Accept),
        ]);
        session.connect().await.unwrap();
        let first = session.channel_id().unwrap();

        assert_eq!(
            session.handle_close(first, "API key expired"),
            CloseAction::RotateCredential
        );
        assert_eq!(session.active_credential_index(), 1);

        session.connect().await.unwrap();
        let second = session.channel_id().unwrap();
        assert_eq!(log.borrow().attempts.last().map(String::as_str), Some("key-b"));

        assert_eq!(
            session.handle_close(second, "API key expired"),
            CloseAction::CredentialsExhausted
        );
        assert!(!session.should_reconnect());
        assert!(session.connection_error().unwrap().starts_with("All 2 API keys failed"));
    }

    #[tokio::test]
    async fn traffic_resets_rejection_count() {
        let (mut session, _log) = make_session(&[
            ("key-a", Behavior::Accept),
            ("key-b", Behavior::Accept),
        ]);
        session.connect().await.unwrap();
        let id = session.channel_id().unwrap();
        assert_eq!(session.handle_close(id, "API key expired"), CloseAction::RotateCredential);

        session.connect().await.unwrap();
        let id = session.channel_id().unwrap();
        session.handle_message(id, model_text("hi", true));

        assert_eq!(session.handle_close(id, "API key expired"), CloseAction::RotateCredential);
    }

    // -----------------------------------------------------------------------
    // Tool calls
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn tool_batch_is_answered_once_in_order() {
        let (mut session, log, id) = connected_session().await;
        let tools = session.tools_mut();
        tools.register(ToolName::GetPlayerPosition, |_: &Value| {
            Ok(ToolResult::ok().with("position", [0.0, 0.0, 0.0]))
        });
        tools.register(ToolName::ChangeObjectColor, |_: &Value| {
            Err(ToolError::Failed("paint ran out".into()))
        });
        tools.register(ToolName::RotateObject, |_: &Value| -> Result<ToolResult, ToolError> {
            panic!("gimbal lock")
        });

        session.handle_message(
            id,
            tool_calls(&[
                ("1", "getPlayerPosition", Value::Null),
                ("2", "summonGhost", json!({})),
                ("3", "changeObjectColor", json!({"objectName": "bed", "color": "red"})),
                ("4", "rotateObject", json!({"objectName": "bed", "action": "flip"})),
            ]),
        );

        assert_eq!(log.borrow().sent.len(), 1);
        let results = last_tool_results(&log);
        let names: Vec<_> = results.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["getPlayerPosition", "summonGhost", "changeObjectColor", "rotateObject"]
        );

        assert!(results[0].1.success);
        assert!(!results[1].1.success);
        assert_eq!(results[1].1.get("error"), Some(&json!(NOT_IMPLEMENTED)));
        assert!(!results[2].1.success);
        assert_eq!(results[2].1.get("error"), Some(&json!("paint ran out")));
        assert!(!results[3].1.success);
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn detective_thoughts_are_handled_locally() {
        let (mut session, log, id) = connected_session().await;
        session.drain_events(16);

        session.handle_message(
            id,
            tool_calls(&[(
                "t1",
                "updateDetectiveThoughts",
                json!({"thought": "The match is near the window", "priority": "HIGH"}),
            )]),
        );

        let results = last_tool_results(&log);
        assert!(results[0].1.success);
        let thought = session.thought().unwrap();
        assert_eq!(thought.priority, ThoughtPriority::High);
        assert_eq!(thought.thought, "The match is near the window");
        assert!(session
            .drain_events(16)
            .iter()
            .any(|e| matches!(e, SessionEvent::ThoughtUpdated(_))));
    }

    #[tokio::test]
    async fn bad_thought_priority_is_a_failure() {
        let (mut session, log, id) = connected_session().await;

        session.handle_message(
            id,
            tool_calls(&[(
                "t1",
                "updateDetectiveThoughts",
                json!({"thought": "hmm", "priority": "urgent"}),
            )]),
        );

        let results = last_tool_results(&log);
        assert!(!results[0].1.success);
        assert!(results[0].1.message.as_deref().unwrap().contains("urgent"));
        assert!(session.thought().is_none());
    }

    // -----------------------------------------------------------------------
    // Model turns
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn text_parts_flush_on_turn_complete() {
        let (mut session, _log, id) = connected_session().await;

        session.handle_message(id, model_text("The desk ", false));
        session.handle_message(id, model_text("looks disturbed.", false));
        assert!(session.messages().is_empty());

        session.handle_message(id, model_text("", true));
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].text, "The desk looks disturbed.");
        assert!(!session.is_processing());
    }

    #[tokio::test]
    async fn output_transcription_is_appended_immediately() {
        let (mut session, _log, id) = connected_session().await;
        let message = ServerMessage {
            server_content: Some(ServerContent {
                output_transcription: Some(Transcription {
                    text: Some("I see a bed.".into()),
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        session.handle_message(id, message);

        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].text, "I see a bed.");
    }

    #[tokio::test]
    async fn audio_plays_until_interrupted() {
        let clock = ManualClock::new();
        let (session, log) = make_session(&[("key-a", Behavior::Accept)]);
        let mut session =
            session.with_audio(AudioScheduler::new(Box::new(ClockedOutput::new(clock.clone()))));
        session.connect().await.unwrap();
        let id = session.channel_id().unwrap();

        // 0.1 s of silence at 24 kHz
        let pcm = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            vec![0u8; 4_800],
        );
        let speech = ServerMessage {
            server_content: Some(ServerContent {
                model_turn: Some(Content {
                    role: Some("model".into()),
                    parts: vec![
                        Part::inline("audio/pcm;rate=24000", pcm.clone()),
                        Part::inline("audio/pcm;rate=24000", pcm),
                    ],
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        session.handle_message(id, speech);
        assert!(session.is_speaking());
        assert_eq!(session.audio().queued(), 2);

        clock.advance(0.15);
        session.poll_audio();
        assert!(session.is_speaking());

        let interrupted = ServerMessage {
            server_content: Some(ServerContent {
                interrupted: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        session.handle_message(id, interrupted);
        assert!(!session.is_speaking());
        assert_eq!(session.audio().queued(), 0);
        assert!(log.borrow().sent.is_empty());
    }

    // -----------------------------------------------------------------------
    // Outgoing turns
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn sends_without_channel_are_dropped() {
        let (mut session, log) = make_session(&[("key-a", Behavior::Accept)]);

        session.send_text("hello?");
        session.send_audio("AAAA", "audio/webm", "[voice input]");

        assert!(session.messages().is_empty());
        assert!(log.borrow().sent.is_empty());
        assert!(!session.is_processing());
    }

    #[tokio::test]
    async fn text_turn_carries_snapshot_and_directive() {
        let room = EscapeRoom::build();
        let (mut session, log) =
            make_session_with_world(&[("key-a", Behavior::Accept)], room.world().clone());
        session.connect().await.unwrap();

        session.send_text("What is on the desk?");

        let parts = last_turn_parts(&log);
        assert_eq!(parts.len(), 3);
        let snapshot = parts[0].text.as_deref().unwrap();
        assert!(snapshot.starts_with(SNAPSHOT_START));
        assert!(snapshot.contains("\"desk\""));
        assert_eq!(parts[1].text.as_deref(), Some(LANGUAGE_DIRECTIVE));
        assert_eq!(parts[2].text.as_deref(), Some("What is on the desk?"));

        assert!(session.is_processing());
        assert_eq!(session.messages()[0].role, Role::User);
        assert_eq!(session.messages()[0].text, "What is on the desk?");
    }

    #[tokio::test]
    async fn voice_turn_carries_inline_audio() {
        let (mut session, log, _) = connected_session().await;
        let utterance = RecordedUtterance {
            audio: vec![1, 2, 3],
            mime_type: "audio/webm".into(),
            transcript: Some("light the fire".into()),
        };

        session.send_utterance(&utterance);

        let parts = last_turn_parts(&log);
        let blob = parts[2].inline_data.as_ref().unwrap();
        assert_eq!(blob.mime_type, "audio/webm");
        assert_eq!(blob.data, "AQID");
        assert_eq!(session.messages()[0].text, "light the fire");
    }

    #[tokio::test]
    async fn failed_send_is_reported() {
        let (mut session, log, _) = connected_session().await;
        log.borrow_mut().fail_sends = true;

        session.send_text("anyone there?");

        assert!(!session.is_processing());
        assert_eq!(session.connection_error(), Some("channel closed"));
    }

    #[tokio::test]
    async fn drain_events_respects_limit() {
        let (mut session, _log, id) = connected_session().await;
        session.handle_message(id, model_text("one", true));
        session.handle_message(id, model_text("two", true));

        let first = session.drain_events(1);
        assert_eq!(first.len(), 1);
        let rest = session.drain_events(64);
        let appended = rest
            .iter()
            .filter(|e| matches!(e, SessionEvent::MessageAppended(_)))
            .count();
        assert_eq!(appended, 2);
        assert!(session.drain_events(64).is_empty());
    }

    #[test]
    fn tool_registry_is_exposed_on_the_session() {
        let mut tools = ToolRegistry::new();
        let room = EscapeRoom::build();
        room.register_tools(&mut tools);
        let (session, _log) = make_session_with_world(&[], room.world().clone());
        let session = session.with_tools(tools);
        assert!(session.tools().contains(ToolName::PickupObject));
        assert!(!session.tools().contains(ToolName::UpdateDetectiveThoughts));
        assert_eq!(session.total_credentials(), 0);
    }
}
