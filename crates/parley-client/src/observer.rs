//! Notification hook for the UI layer.

use parley_core::Environment;

use crate::{client::Client, event::Notification};

/// Receives every [`Notification`] the client emits.
///
/// Called on the runtime loop after the event that caused the notification
/// has been fully applied, so `client` already reflects it. Must not block.
pub trait Observer<E: Environment>: Send {
    /// Handle one notification.
    fn notify(&mut self, client: &Client<E>, notification: &Notification);
}

impl<E, F> Observer<E> for F
where
    E: Environment,
    F: FnMut(&Client<E>, &Notification) + Send,
{
    fn notify(&mut self, client: &Client<E>, notification: &Notification) {
        self(client, notification);
    }
}
