//! Client-side properties checked after every simulated step.
//!
//! A [`SystemSnapshot`] pairs what each client believes (cache, room list,
//! live subscription) with what the broker actually holds for its socket.
//! Each [`Invariant`] inspects one snapshot and names the first client that
//! breaks it.

mod checks;
mod snapshot;

pub use checks::{
    ActiveSubscriptionMatches, MessagesOrdered, RoomListOrdered, SingleRoomSubscription,
};
pub use snapshot::{ClientSnapshot, SystemSnapshot};

/// Outcome of a single invariant check.
pub type InvariantResult = Result<(), Violation>;

/// A broken invariant and the client state that broke it.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Which invariant failed.
    pub invariant: &'static str,
    /// Offending client and the values involved.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property of client and broker state.
pub trait Invariant: Send + Sync {
    /// Short snake_case name used in failure output.
    fn name(&self) -> &'static str;

    /// Inspect `state`, reporting the first offending client.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Set of invariants run together against a snapshot.
#[derive(Default)]
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantRegistry {
    /// Message ordering, subscription and room list checks.
    pub fn standard() -> Self {
        Self {
            invariants: vec![
                Box::new(MessagesOrdered),
                Box::new(SingleRoomSubscription),
                Box::new(ActiveSubscriptionMatches),
                Box::new(RoomListOrdered),
            ],
        }
    }

    /// Register one more check.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Run every check, collecting each violation rather than stopping early.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Like [`check_all`](Self::check_all), failing the test on any violation.
    #[allow(clippy::panic, reason = "Test assertion helper")]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let lines: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("{} invariant(s) broken {context}:\n  {}", lines.len(), lines.join("\n  "));
        }
    }

    /// Names of the registered checks, in run order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.invariants.iter().map(|inv| inv.name())
    }

    /// Number of registered checks.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// No checks registered.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use parley_core::ConnectionState;

    use super::*;

    fn connected(active_room: Option<u64>, broker_rooms: Vec<u64>) -> ClientSnapshot {
        ClientSnapshot {
            id: 1,
            state: ConnectionState::Connected,
            active_room,
            live_room: active_room,
            broker_rooms,
            messages: BTreeMap::new(),
            rooms: Vec::new(),
        }
    }

    struct NoClients;

    impl Invariant for NoClients {
        fn name(&self) -> &'static str {
            "no_clients"
        }

        fn check(&self, state: &SystemSnapshot) -> InvariantResult {
            match state.clients.first() {
                Some(client) => Err(Violation {
                    invariant: self.name(),
                    message: format!("client {} present", client.id),
                }),
                None => Ok(()),
            }
        }
    }

    #[test]
    fn standard_registry_runs_client_checks() {
        let registry = InvariantRegistry::standard();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(
            names,
            [
                "messages_ordered",
                "single_room_subscription",
                "active_subscription_matches",
                "room_list_ordered"
            ]
        );
    }

    #[test]
    fn empty_snapshot_passes_invariants() {
        let registry = InvariantRegistry::standard();
        assert!(registry.check_all(&SystemSnapshot::empty()).is_ok());
    }

    #[test]
    fn consistent_client_passes() {
        let snapshot = SystemSnapshot::single(connected(Some(7), vec![7]));
        assert!(InvariantRegistry::standard().check_all(&snapshot).is_ok());
    }

    #[test]
    fn every_violation_is_collected() {
        // Two broker subscriptions also disagree with the single active room
        let snapshot = SystemSnapshot::single(connected(Some(7), vec![7, 9]));
        let mut registry = InvariantRegistry::standard();
        registry.add(NoClients);

        let violations = registry.check_all(&snapshot).unwrap_err();
        let broken: Vec<_> = violations.iter().map(|v| v.invariant).collect();
        assert_eq!(broken, ["single_room_subscription", "active_subscription_matches", "no_clients"]);
        assert_eq!(violations[2].to_string(), "[no_clients] client 1 present");
    }

    #[test]
    #[should_panic(expected = "broken after reconnect")]
    fn assert_all_panics_with_context() {
        let mut registry = InvariantRegistry::default();
        registry.add(NoClients);
        registry.assert_all(&SystemSnapshot::single(connected(None, vec![])), "after reconnect");
    }
}
