//! Property tests over random operation sequences.
//!
//! proptest generates interleavings of user actions, server pushes, network
//! faults and out-of-order REST completions. `SimClient` asserts the standard
//! invariants every time the system settles, so any violating sequence fails
//! and shrinks to a minimal reproduction.

use std::time::Duration;

use parley_core::ConnectionState;
use parley_harness::{SharedSimServer, SimClient, SimEnv, create_shared_server, lock};
use parley_proto::{
    RoomId,
    payloads::{ErrorEvent, Severity},
};
use proptest::prelude::*;

const ANA: u64 = 1;
const EVE: u64 = 5;
const ROOMS: [RoomId; 3] = [7, 9, 11];

#[derive(Debug, Clone)]
enum Op {
    SetActiveRoom(Option<RoomId>),
    Send { room: RoomId, text: String },
    Post { room: RoomId },
    /// Push with a caller-chosen id, possibly below ids already delivered
    PostWithId { room: RoomId, id: u64 },
    Replay(RoomId),
    CompleteNextRest,
    CompleteNewestRest,
    Advance(u16),
    DropConnection,
    Focus(bool),
    CloseViewError,
}

fn room() -> impl Strategy<Value = RoomId> {
    prop::sample::select(ROOMS.to_vec())
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => prop::option::of(room()).prop_map(Op::SetActiveRoom),
        2 => (room(), "[a-z ]{0,8}").prop_map(|(room, text)| Op::Send { room, text }),
        3 => room().prop_map(|room| Op::Post { room }),
        1 => (room(), 1..40u64).prop_map(|(room, id)| Op::PostWithId { room, id }),
        1 => room().prop_map(Op::Replay),
        3 => Just(Op::CompleteNextRest),
        2 => Just(Op::CompleteNewestRest),
        3 => (0..3000u16).prop_map(Op::Advance),
        1 => Just(Op::DropConnection),
        1 => any::<bool>().prop_map(Op::Focus),
        1 => Just(Op::CloseViewError),
    ]
}

fn world() -> SharedSimServer {
    let server = create_shared_server();
    {
        let mut server = lock(&server);
        server.add_user(ANA, "Ana", "tok-ana");
        server.add_user(EVE, "Eve", "tok-eve");
        for room_id in ROOMS {
            server.add_room(room_id, &format!("room {room_id}"), &[ANA, EVE]);
        }
    }
    server
}

fn apply(server: &SharedSimServer, ana: &mut SimClient, op: &Op) {
    match op {
        Op::SetActiveRoom(room) => {
            ana.set_active_room(*room);
        },
        Op::Send { room, text } => {
            ana.send(*room, text);
        },
        Op::Post { room } => {
            lock(server).post(*room, EVE, "ping");
            ana.pump();
        },
        Op::PostWithId { room, id } => {
            lock(server).inject_message(*room, *id, EVE, "late");
            ana.pump();
        },
        Op::Replay(room) => {
            lock(server).replay(*room);
            ana.pump();
        },
        Op::CompleteNextRest => {
            ana.complete_next_rest();
        },
        Op::CompleteNewestRest => {
            let mut pending = ana.take_pending_rest();
            if let Some(newest) = pending.pop() {
                ana.complete(&newest);
            }
            for action in pending {
                ana.complete(&action);
            }
        },
        Op::Advance(ms) => {
            ana.advance(Duration::from_millis(u64::from(*ms)));
        },
        Op::DropConnection => {
            ana.drop_connection("chaos");
        },
        Op::Focus(focused) => {
            ana.set_focus(*focused);
        },
        Op::CloseViewError => {
            lock(server).push_error(ANA, &ErrorEvent {
                message: Some("closed".to_string()),
                action: Some("close".to_string()),
                severity: Some(Severity::Modal),
                ..ErrorEvent::default()
            });
            ana.pump();
        },
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn invariants_hold_under_random_operations(ops in prop::collection::vec(op(), 1..60)) {
        let server = world();
        let mut ana = SimClient::new(server.clone(), SimEnv::new(), ANA).manual_rest();
        ana.connect("tok-ana");

        for op in &ops {
            apply(&server, &mut ana, op);
        }

        // Settle: finish outstanding fetches and let any reconnect happen
        ana.set_focus(true);
        ana.complete_rest();
        ana.run_for(Duration::from_secs(6), Duration::from_millis(500));
        ana.complete_rest();
        prop_assert_eq!(ana.client().connection_state(), ConnectionState::Connected);

        // Reopening a room converges its cache on the server's history
        for room_id in ROOMS {
            ana.set_active_room(None);
            ana.set_active_room(Some(room_id));
            ana.complete_rest();

            let history = lock(&server).rest_history(ANA, room_id).unwrap_or_default();
            for message in history {
                prop_assert!(
                    ana.client().cache().contains(room_id, message.message_id),
                    "room {} missing message {}", room_id, message.message_id
                );
            }
            prop_assert!(ana.client().is_subscribed(room_id));
        }
    }

    #[test]
    fn pushes_in_any_order_are_cached_once_in_id_order(
        ids in prop::collection::vec(1..50u64, 1..30),
    ) {
        let server = world();
        let mut ana = SimClient::new(server.clone(), SimEnv::new(), ANA);
        ana.connect("tok-ana");
        ana.set_active_room(Some(7));

        for id in &ids {
            lock(&server).inject_message(7, *id, EVE, "x");
        }
        ana.pump();
        lock(&server).replay(7);
        ana.pump();

        let mut expected = ids.clone();
        expected.sort_unstable();
        expected.dedup();
        let cached: Vec<_> = ana.client().messages(7).map(|m| m.message_id).collect();
        prop_assert_eq!(cached, expected);
    }
}
