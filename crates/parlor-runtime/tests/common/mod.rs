#![allow(dead_code, missing_docs)]

use std::sync::Arc;

use parlor_backend::mock::{CallEvent, MockBackend};
use parlor_core::{Agent, IncomingMessage, Role, Room, RoomId};
use parlor_runtime::RoomOrchestrator;
use parlor_settings::ParlorSettings;
use parlor_store::{MemoryStore, RoomStore};

/// One room wired to an orchestrator over the mock backend.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub backend: MockBackend,
    pub orchestrator: Arc<RoomOrchestrator>,
    pub room: RoomId,
}

pub fn quiet_settings() -> ParlorSettings {
    let mut settings = ParlorSettings::default();
    settings.pool.stabilization_delay_ms = 0;
    settings.orchestrator.shuffle_regular_agents = false;
    settings.orchestrator.max_follow_up_rounds = 0;
    settings
}

impl Harness {
    pub fn new(agents: impl IntoIterator<Item = Agent>) -> Self {
        Self::build(Room::new(1, "parlor"), agents, |_| {})
    }

    pub fn build(room: Room, agents: impl IntoIterator<Item = Agent>, tweak: impl FnOnce(&mut ParlorSettings)) -> Self {
        let mut settings = quiet_settings();
        tweak(&mut settings);

        let store = Arc::new(MemoryStore::new());
        let room = store.add_room(room);
        for agent in agents {
            store.add_agent(room, agent).unwrap();
        }

        let backend = MockBackend::new();
        let dyn_store: Arc<dyn RoomStore> = store.clone();
        let orchestrator = Arc::new(RoomOrchestrator::from_settings(dyn_store, Arc::new(backend.clone()), &settings));
        Self {
            store,
            backend,
            orchestrator,
            room,
        }
    }

    pub async fn say(&self, text: &str) {
        self.send(IncomingMessage::text(text)).await;
    }

    pub async fn send(&self, message: IncomingMessage) {
        self.orchestrator.handle_new_message(self.room, message).await.unwrap();
    }

    /// (speaker, content) of every real agent reply, in store order.
    pub fn replies(&self) -> Vec<(String, String)> {
        self.store
            .messages(self.room)
            .into_iter()
            .filter(|m| m.role == Role::Assistant && !m.is_skip_marker())
            .map(|m| (m.speaker.unwrap_or_default(), m.content))
            .collect()
    }

    pub fn speakers(&self) -> Vec<String> {
        self.replies().into_iter().map(|(speaker, _)| speaker).collect()
    }

    pub fn human_messages(&self) -> Vec<String> {
        self.store
            .messages(self.room)
            .into_iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content)
            .collect()
    }

    pub fn position(&self, event: &CallEvent) -> usize {
        self.backend
            .calls()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("{event:?} never happened"))
    }
}

pub fn started(agent: &str) -> CallEvent {
    CallEvent::Started(agent.to_string())
}

pub fn finished(agent: &str) -> CallEvent {
    CallEvent::Finished(agent.to_string())
}
