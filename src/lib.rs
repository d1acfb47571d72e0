//! Detective Live
//!
//! Realtime bridge between an escape-room scene and a hosted conversational
//! model that can inspect and change that scene through tools.
//!
//! ## Architecture
//!
//! ```text
//! AgentSession  (session.rs)          ← connection state machine, turn protocol
//!   ├── Connector / Channel           ← transport.rs (WebSocket, `server` feature)
//!   ├── ToolRegistry  (tools.rs)      ← closed tool set, dispatch
//!   │     └── EscapeRoom (escape_room.rs) ← game callbacks, player mover
//!   ├── AudioScheduler (audio.rs)     ← gapless speech playback
//!   └── WorldRegistry  (world.rs)     ← labels, collisions, snapshots
//!         └── Scene (scene.rs)        ← live node tree
//! ```
//!
//! Everything runs on one thread. Shared state is `Rc<RefCell<_>>`, and
//! the front end drives the session by feeding it channel events and
//! draining [`session::SessionEvent`]s each frame.

// Protocol, session and game core are always available.
pub mod audio;
pub mod capture;
pub mod credentials;
pub mod error;
pub mod escape_room;
pub mod protocol;
pub mod scene;
pub mod session;
pub mod tools;
pub mod types;
pub mod wav;
pub mod world;

// The network transport requires the `server` feature.
#[cfg(feature = "server")]
pub mod transport;

// Convenience re-exports
pub use audio::AudioScheduler;
pub use error::{ChannelError, SessionError, ToolError};
pub use escape_room::EscapeRoom;
pub use protocol::ToolResult;
pub use session::{AgentSession, SessionEvent, SessionStatus};
pub use tools::{ToolName, ToolRegistry};
pub use types::{SessionConfig, Vec3};
pub use world::{SharedWorld, WorldRegistry};

#[cfg(feature = "server")]
pub use transport::GeminiConnector;
