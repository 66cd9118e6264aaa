//! Collaborator interfaces
//!
//! The engine never talks to a radio or an application directly. It hands
//! advertisements to a [`Transport`] and value changes to an
//! [`EventHandler`]; both are called with the mesh state already updated.

use crate::types::{Advertisement, MeshEvent};

/// Best-effort, unordered, unreliable broadcast.
///
/// Implementations must not block. Dropping an advertisement is always
/// acceptable: the scheduler will advertise again.
pub trait Transport {
    fn send(&mut self, adv: Advertisement);
}

/// Fire-and-forget notification of value changes.
pub trait EventHandler {
    fn on_event(&mut self, event: MeshEvent);
}

impl Transport for Vec<Advertisement> {
    fn send(&mut self, adv: Advertisement) {
        self.push(adv);
    }
}

impl EventHandler for Vec<MeshEvent> {
    fn on_event(&mut self, event: MeshEvent) {
        self.push(event);
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, adv: Advertisement) {
        (**self).send(adv)
    }
}

impl<H: EventHandler + ?Sized> EventHandler for &mut H {
    fn on_event(&mut self, event: MeshEvent) {
        (**self).on_event(event)
    }
}
