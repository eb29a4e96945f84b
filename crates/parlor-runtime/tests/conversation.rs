#![allow(missing_docs)]

mod common;

use std::time::Duration;

use parlor_backend::mock::MockReply;
use parlor_core::{Agent, AgentId, IncomingMessage, NewMessage, ParticipantType, Room};
use parlor_store::RoomStore;
use tracing::Level;

use common::{Harness, finished, started};

#[tokio::test]
async fn priority_agents_finish_before_regulars_start() {
    let h = Harness::new([
        Agent::new(1, "Host").with_priority(1),
        Agent::new(2, "Alice"),
        Agent::new(3, "Bob"),
    ]);
    h.say("good evening").await;

    let host_done = h.position(&finished("Host"));
    assert!(host_done < h.position(&started("Alice")));
    assert!(host_done < h.position(&started("Bob")));

    let mut speakers = h.speakers();
    assert_eq!(speakers.remove(0), "Host");
    speakers.sort();
    assert_eq!(speakers, vec!["Alice", "Bob"]);
}

#[tokio::test]
async fn regulars_run_concurrently_in_the_initial_round() {
    let h = Harness::new([Agent::new(1, "Alice"), Agent::new(2, "Bob")]);
    for agent in ["Alice", "Bob"] {
        h.backend
            .script(agent, [MockReply::delayed(Duration::from_millis(20), MockReply::text("hi"))]);
    }
    h.say("hello").await;

    let calls = h.backend.calls();
    let first_finish = calls
        .iter()
        .position(|e| *e == finished("Alice") || *e == finished("Bob"))
        .unwrap();
    assert!(h.position(&started("Alice")) < first_finish);
    assert!(h.position(&started("Bob")) < first_finish);
}

#[tokio::test]
async fn follow_up_rounds_continue_the_conversation() {
    let h = Harness::build(
        Room::new(1, "salon"),
        [Agent::new(1, "Alice").with_priority(2), Agent::new(2, "Bob").with_priority(1)],
        |s| s.orchestrator.max_follow_up_rounds = 2,
    );
    h.say("discuss").await;

    assert_eq!(h.replies().len(), 6);
    assert_eq!(h.speakers(), vec!["Alice", "Bob", "Alice", "Bob", "Alice", "Bob"]);
}

#[tokio::test]
async fn room_interaction_limit_is_exact() {
    let h = Harness::build(
        Room::new(1, "capped").with_max_interactions(3),
        [Agent::new(1, "Alice"), Agent::new(2, "Bob")],
        |s| s.orchestrator.max_follow_up_rounds = 5,
    );
    h.say("go").await;
    assert_eq!(h.replies().len(), 3);
}

#[tokio::test]
async fn global_cap_stops_follow_ups() {
    let h = Harness::build(
        Room::new(1, "chatty"),
        [Agent::new(1, "Alice"), Agent::new(2, "Bob"), Agent::new(3, "Carol")],
        |s| {
            s.orchestrator.max_follow_up_rounds = 10;
            s.orchestrator.max_total_messages = 4;
        },
    );
    h.say("go").await;
    assert_eq!(h.replies().len(), 4);
}

#[tokio::test]
async fn everyone_skipping_finishes_the_room() {
    let h = Harness::build(Room::new(1, "done"), [Agent::new(1, "Alice"), Agent::new(2, "Bob")], |s| {
        s.orchestrator.max_follow_up_rounds = 3;
    });
    h.backend.set_default_reply(MockReply::Skip);
    h.say("anything else?").await;

    assert!(h.replies().is_empty());
    assert!(h.store.get_room(h.room).await.unwrap().is_finished);

    // A fresh human message reopens the conversation.
    h.backend.set_default_reply(MockReply::text("actually, yes"));
    h.say("really?").await;
    assert!(!h.store.get_room(h.room).await.unwrap().is_finished);
    assert!(h.replies().len() >= 2);
}

#[tokio::test]
async fn mentions_restrict_who_answers() {
    let h = Harness::new([Agent::new(1, "Alice"), Agent::new(2, "Bob"), Agent::new(3, "Carol")]);
    h.send(IncomingMessage::text("@Bob what do you think?").mentioning([AgentId::new(2)]))
        .await;
    assert_eq!(h.speakers(), vec!["Bob"]);
}

#[tokio::test]
async fn unknown_mentions_fall_back_to_everyone() {
    let h = Harness::new([Agent::new(1, "Alice"), Agent::new(2, "Bob")]);
    h.send(IncomingMessage::text("@nobody hi").mentioning([AgentId::new(99)]))
        .await;
    assert_eq!(h.replies().len(), 2);
}

#[tokio::test]
async fn interrupt_agent_reacts_after_each_speaker() {
    let h = Harness::new([Agent::new(1, "Alice"), Agent::new(2, "Bob"), Agent::new(9, "Heckler").interrupting()]);
    h.say("opening remarks").await;

    let speakers = h.speakers();
    assert_eq!(speakers.last().map(String::as_str), Some("Heckler"));
    // The second interrupt cell has nothing new to react to.
    assert_eq!(speakers.iter().filter(|s| *s == "Heckler").count(), 1);
    assert!(h.position(&started("Heckler")) > h.position(&finished("Alice")));
    assert!(h.position(&started("Heckler")) > h.position(&finished("Bob")));
}

#[tokio::test]
async fn transparent_interrupters_suppress_follow_ups() {
    let h = Harness::build(
        Room::new(1, "quiet"),
        [
            Agent::new(1, "Alice"),
            Agent::new(2, "Bob"),
            Agent::new(9, "Observer").interrupting().transparent(),
        ],
        |s| s.orchestrator.max_follow_up_rounds = 3,
    );
    h.say("hi").await;

    let mut speakers = h.speakers();
    speakers.sort();
    assert_eq!(speakers, vec!["Alice", "Bob"]);
    assert_eq!(h.backend.query_count("Observer"), 0);
}

#[tokio::test]
async fn critics_write_feedback_not_messages() {
    let h = Harness::new([Agent::new(1, "Alice"), Agent::new(2, "Bob"), Agent::new(7, "Critic").critic()]);
    h.backend.script("Critic", [MockReply::text("Alice rambled.")]);
    h.say("debate").await;

    assert!(!h.speakers().contains(&"Critic".to_string()));
    assert_eq!(
        h.store.critic_feedback(h.room),
        vec![(AgentId::new(7), "Alice rambled.".to_string())]
    );
    assert!(h.position(&started("Critic")) > h.position(&finished("Alice")));
    assert!(h.position(&started("Critic")) > h.position(&finished("Bob")));
}

#[tokio::test]
async fn presaved_message_is_not_stored_twice() {
    let h = Harness::new([Agent::new(1, "Alice")]);
    let saved = h
        .store
        .create_message(h.room, NewMessage::user("already here", ParticipantType::User, None))
        .await
        .unwrap();
    h.send(IncomingMessage::text("already here").saved_as(saved.id)).await;

    assert_eq!(h.human_messages(), vec!["already here"]);
    assert_eq!(h.replies().len(), 1);
}

#[tokio::test]
async fn paused_room_records_but_does_not_answer() {
    let h = Harness::new([Agent::new(1, "Alice"), Agent::new(2, "Bob")]);
    h.store.set_paused(h.room, true).unwrap();
    h.say("hello?").await;

    assert_eq!(h.human_messages(), vec!["hello?"]);
    assert!(h.replies().is_empty());
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn sessions_are_reused_across_rounds() {
    let h = Harness::new([Agent::new(1, "Alice"), Agent::new(2, "Bob")]);
    h.say("one").await;
    h.say("two").await;

    assert_eq!(h.backend.sessions_opened(), 2);
    assert_eq!(h.backend.query_count("Alice"), 2);
    assert_eq!(h.orchestrator.pool().len(), 2);
}

#[tokio::test]
async fn round_logs_are_structured() {
    let (logs, _guard) = parlor_core::logging::capture_logs();
    let h = Harness::new([Agent::new(1, "Alice"), Agent::new(2, "Bob")]);
    h.say("hello").await;

    assert!(logs.has_event(Level::INFO, "starting round"));
    let complete = logs
        .events()
        .into_iter()
        .find(|e| e.message == "round complete")
        .unwrap();
    assert_eq!(complete.field("responses"), Some("2"));
}
