//! Fuzz target for the message cache merge engine
//!
//! # Invariants
//!
//! - Each room's messages are strictly ascending by id (sorted, no duplicates)
//! - Every id ever pushed or loaded for a room is present until eviction
//! - Rooms never leak messages into each other

#![no_main]

use std::collections::{BTreeSet, HashMap};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_core::{ChatMessage, MessageCache, Sender};
use parley_proto::payloads::PushedMessage;

#[derive(Debug, Clone, Arbitrary)]
enum CacheOp {
    Push { room: u8, id: u8, sender: u8 },
    History { room: u8, ids: Vec<(u8, u8)> },
    Evict { room: u8 },
}

fuzz_target!(|ops: Vec<CacheOp>| {
    let mut cache = MessageCache::new();
    let mut expected: HashMap<u64, BTreeSet<u64>> = HashMap::new();

    for op in ops {
        match op {
            CacheOp::Push { room, id, sender } => {
                let room = u64::from(room % 4);
                cache.apply_pushed(&PushedMessage {
                    message_id: u64::from(id),
                    chat_room_id: room,
                    sender_id: u64::from(sender),
                    content: String::new(),
                    sent_time: String::new(),
                    display_time: String::new(),
                });
                expected.entry(room).or_default().insert(u64::from(id));
            },
            CacheOp::History { room, ids } => {
                let room = u64::from(room % 4);
                let history: Vec<_> = ids
                    .iter()
                    .map(|(id, sender)| ChatMessage {
                        message_id: u64::from(*id),
                        room_id: room,
                        sender: Sender {
                            user_id: u64::from(*sender),
                            name: format!("user {sender}"),
                            profile_image_url: None,
                        },
                        content: String::new(),
                        sent_time: String::new(),
                        display_time: String::new(),
                    })
                    .collect();
                cache.load_history(room, history);
                expected.entry(room).or_default().extend(ids.iter().map(|(id, _)| u64::from(*id)));
            },
            CacheOp::Evict { room } => {
                let room = u64::from(room % 4);
                cache.evict(room);
                expected.remove(&room);
            },
        }

        for room in 0..4 {
            let ids: Vec<_> = cache.messages(room).map(|m| m.message_id).collect();
            assert!(ids.windows(2).all(|w| w[0] < w[1]), "room {room} out of order: {ids:?}");
            assert!(cache.messages(room).all(|m| m.room_id == room));

            let want: Vec<_> = expected.get(&room).map(|s| s.iter().copied().collect()).unwrap_or_default();
            assert_eq!(ids, want, "room {room} contents diverged");
        }
    }
});
