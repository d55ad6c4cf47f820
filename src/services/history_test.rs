use super::*;
use crate::services::room::append_message;
use crate::state::test_helpers::seed_room;
use crate::store::MemoryStore;

fn entry(role: DialogueRole, content: &str) -> DialogueHistoryEntry {
    DialogueHistoryEntry { role, content: content.into() }
}

#[tokio::test]
async fn dialogue_history_is_relative_to_the_requester() {
    let store = MemoryStore::new();
    let room = seed_room(&store, "alice", "bob").await;
    append_message(&store, &room.id, "alice", "hi").await.expect("append");
    append_message(&store, &room.id, "bob", "hey").await.expect("append");

    let for_alice = compile_dialogue_history(&store, &room.id, "alice").await.expect("alice");
    let for_bob = compile_dialogue_history(&store, &room.id, "bob").await.expect("bob");

    assert_eq!(for_alice, vec![entry(DialogueRole::Own, "hi"), entry(DialogueRole::Other, "hey")]);
    assert_eq!(for_bob, vec![entry(DialogueRole::Other, "hi"), entry(DialogueRole::Own, "hey")]);
}

#[tokio::test]
async fn dialogue_history_of_empty_room_is_empty() {
    let store = MemoryStore::new();
    let room = seed_room(&store, "alice", "bob").await;
    assert!(compile_dialogue_history(&store, &room.id, "alice").await.expect("empty").is_empty());
}

#[tokio::test]
async fn coaching_history_excludes_the_current_exchange() {
    let store = MemoryStore::new();
    let (room, user) = ("r1", "alice");

    for n in 0..3 {
        coaching::append_user_turn(&store, room, user, &format!("question {n}")).await.expect("user");
        let handle = coaching::append_placeholder(&store, room, user).await.expect("placeholder");
        coaching::resolve_placeholder(&store, handle, &format!("answer {n}")).await.expect("resolve");
    }
    let live = coaching::append_user_turn(&store, room, user, "current").await.expect("user");
    let pending = coaching::append_placeholder(&store, room, user).await.expect("placeholder");

    let exclude: HashSet<String> = [live.id().to_string(), pending.turn_id.clone()].into();
    let history = compile_coaching_history(&store, room, user, &exclude).await.expect("history");

    assert_eq!(history.len(), 6);
    assert!(history.iter().all(|e| e.content != "current" && e.content != coaching::PLACEHOLDER_TEXT));
    assert_eq!(history[0], CoachingHistoryEntry { role: CoachingRole::User, content: "question 0".into() });
    assert_eq!(history[5], CoachingHistoryEntry { role: CoachingRole::Ai, content: "answer 2".into() });

    coaching::resolve_placeholder(&store, pending, "done").await.expect("resolve");
}

#[test]
fn stray_placeholders_are_dropped_even_when_not_excluded() {
    let turns = vec![
        CoachingTurn::User { id: "u1".into(), text: "q".into(), timestamp: 1 },
        CoachingTurn::PendingAi { id: "p-stray".into(), timestamp: 2 },
        CoachingTurn::ResolvedAi { id: "a1".into(), text: "a".into(), timestamp: 3, resolves: None },
    ];

    let history = coaching_entries(&turns, &HashSet::new());
    let roles: Vec<_> = history.iter().map(|e| e.role).collect();
    assert_eq!(roles, vec![CoachingRole::User, CoachingRole::Ai]);
}

#[test]
fn ai_turns_carrying_placeholder_text_are_dropped() {
    let turns = vec![
        CoachingTurn::User { id: "u1".into(), text: "q".into(), timestamp: 1 },
        CoachingTurn::ResolvedAi { id: "a1".into(), text: "Thinking…".into(), timestamp: 2, resolves: Some("p1".into()) },
        CoachingTurn::ResolvedAi { id: "a2".into(), text: " Thinking... ".into(), timestamp: 3, resolves: None },
        CoachingTurn::ResolvedAi { id: "a3".into(), text: "Thinking about it, ask why".into(), timestamp: 4, resolves: None },
    ];

    let history = coaching_entries(&turns, &HashSet::new());
    let contents: Vec<&str> = history.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["q", "Thinking about it, ask why"]);
}

#[tokio::test]
async fn coaching_history_is_private_to_each_user() {
    let store = MemoryStore::new();
    coaching::append_user_turn(&store, "r1", "alice", "mine").await.expect("user");

    let for_bob = compile_coaching_history(&store, "r1", "bob", &HashSet::new()).await.expect("bob");
    assert!(for_bob.is_empty());
}
