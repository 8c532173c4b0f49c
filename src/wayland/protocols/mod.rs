// SPDX-License-Identifier: GPL-3.0-only

//! Typed request/event surfaces of the display-management protocols.
//!
//! The wire bindings live outside this crate; requests arrive as the enums
//! defined here and events leave through [`ClientSink`]s, one per bound
//! protocol object. The sink is the serialization boundary: everything
//! pushed into it has already passed validation.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

pub mod eom;
pub mod screen_mirror;
pub mod video;
pub mod viewport;

/// Identity of a protocol client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

/// Gate for privileged requests, supplied by the surrounding compositor.
pub trait PrivilegeChecker {
    fn check_privilege(&self, client: ClientId, rule: &str) -> bool;
}

/// Checker for standalone operation: everything is allowed.
pub struct AllowAll;

impl PrivilegeChecker for AllowAll {
    fn check_privilege(&self, _client: ClientId, _rule: &str) -> bool {
        true
    }
}

/// Per-object event queue towards one client.
pub struct ClientSink<E> {
    events: Arc<Mutex<VecDeque<E>>>,
}

impl<E> Default for ClientSink<E> {
    fn default() -> Self {
        ClientSink::new()
    }
}

impl<E> Clone for ClientSink<E> {
    fn clone(&self) -> Self {
        ClientSink {
            events: self.events.clone(),
        }
    }
}

impl<E> ClientSink<E> {
    pub fn new() -> ClientSink<E> {
        ClientSink {
            events: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn emit(&self, event: E) {
        self.events.lock().unwrap().push_back(event);
    }

    pub fn drain(&self) -> Vec<E> {
        self.events.lock().unwrap().drain(..).collect()
    }
}

impl<E: Clone> ClientSink<E> {
    pub fn snapshot(&self) -> Vec<E> {
        self.events.lock().unwrap().iter().cloned().collect()
    }
}
