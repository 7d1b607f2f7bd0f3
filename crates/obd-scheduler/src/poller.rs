//! Active Poller Set

use obd_protocol::Command;

/// A recurring request, identified by its catalog name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poller {
    pub name: String,
    /// Request text sent on every poll (e.g. `010C`)
    pub request: String,
}

/// Ordered set of recurring requests. Names are unique.
#[derive(Debug, Clone, Default)]
pub struct PollerSet {
    pollers: Vec<Poller>,
}

impl PollerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a poller. Returns `false` and leaves the set unchanged when the
    /// name is already present.
    pub fn add(&mut self, name: impl Into<String>, request: impl Into<String>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.pollers.push(Poller {
            name,
            request: request.into(),
        });
        true
    }

    /// Remove the poller with this name. Returns whether one was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.pollers.iter().position(|p| p.name == name) {
            Some(index) => {
                self.pollers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.pollers.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pollers.iter().any(|p| p.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.pollers.iter().map(|p| p.name.clone()).collect()
    }

    /// One command per poller, in insertion order, each expecting a single reply
    pub fn commands(&self) -> Vec<Command> {
        self.pollers
            .iter()
            .map(|p| Command::with_replies(p.request.clone(), 1))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pollers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pollers.is_empty()
    }
}
