//! Subscriber session registry.
//!
//! One session per event key. The key is the caller's origin for the
//! token-authenticated endpoint and the caller-chosen session key on the
//! legacy endpoint. A second handshake for an occupied key is rejected, not
//! replaced; a key whose socket has already gone away is treated as free.

use std::time::SystemTime;

use dashmap::DashMap;
use tokio::sync::mpsc;

/// Handshake attempted against an occupied event key.
#[derive(Debug, thiserror::Error)]
#[error("already established.")]
pub struct AlreadyEstablished;

/// Event sink lost between registration and delivery.
#[derive(Debug, thiserror::Error)]
#[error("subscriber is gone")]
pub struct SubscriberLost;

pub struct SubscriberSession {
    /// Serialized event frames to write to the subscriber's socket.
    sender: mpsc::UnboundedSender<String>,
    /// Who this session belongs to (origin or legacy session key).
    pub uri: String,
    pub connected_at: SystemTime,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SubscriberSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        event_key: impl Into<String>,
        uri: impl Into<String>,
        sender: mpsc::UnboundedSender<String>,
    ) -> Result<(), AlreadyEstablished> {
        let event_key = event_key.into();
        use dashmap::mapref::entry::Entry;
        match self.sessions.entry(event_key) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().sender.is_closed() {
                    return Err(AlreadyEstablished);
                }
                occupied.insert(SubscriberSession {
                    sender,
                    uri: uri.into(),
                    connected_at: SystemTime::now(),
                });
                Ok(())
            }
            Entry::Vacant(vacant) => {
                vacant.insert(SubscriberSession {
                    sender,
                    uri: uri.into(),
                    connected_at: SystemTime::now(),
                });
                Ok(())
            }
        }
    }

    pub fn unregister(&self, event_key: &str) -> bool {
        self.sessions.remove(event_key).is_some()
    }

    pub fn contains(&self, event_key: &str) -> bool {
        self.sessions.contains_key(event_key)
    }

    /// Deliver one serialized frame to the session under `event_key`.
    pub fn send_to(&self, event_key: &str, frame: String) -> Result<(), SubscriberLost> {
        let session = self.sessions.get(event_key).ok_or(SubscriberLost)?;
        session.sender.send(frame).map_err(|_| SubscriberLost)
    }

    /// Event keys whose delivery failed, for the caller to clean up.
    pub fn broadcast(&self, frame: &str) -> Vec<String> {
        let mut lost = Vec::new();
        for session in self.sessions.iter() {
            if session.sender.send(frame.to_string()).is_err() {
                lost.push(session.key().clone());
            }
        }
        lost
    }

    /// Drop every session registered under `uri` (system profile event
    /// cleanup). Returns the removed event keys.
    pub fn drop_by_uri(&self, uri: &str) -> Vec<String> {
        let keys: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.uri == uri)
            .map(|s| s.key().clone())
            .collect();
        for key in &keys {
            self.sessions.remove(key);
        }
        keys
    }

    /// Remove every session, returning the removed event keys.
    pub fn drain(&self) -> Vec<String> {
        let keys: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();
        for key in &keys {
            self.sessions.remove(key);
        }
        keys
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_is_rejected_while_live() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        registry.register("http://app", "http://app", tx1).unwrap();
        assert!(registry.register("http://app", "http://app", tx2).is_err());
    }

    #[test]
    fn dead_session_frees_its_key() {
        let registry = SessionRegistry::new();
        let (tx1, rx1) = mpsc::unbounded_channel();
        registry.register("http://app", "http://app", tx1).unwrap();
        drop(rx1);
        let (tx2, _rx2) = mpsc::unbounded_channel();
        assert!(registry.register("http://app", "http://app", tx2).is_ok());
    }

    #[test]
    fn broadcast_reports_lost_subscribers() {
        let registry = SessionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        registry.register("a", "a", tx1).unwrap();
        registry.register("b", "b", tx2).unwrap();
        drop(rx2);

        let lost = registry.broadcast("{}");
        assert_eq!(lost, vec!["b".to_string()]);
        assert_eq!(rx1.try_recv().unwrap(), "{}");
    }

    #[test]
    fn drop_by_uri_removes_matching_sessions() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        registry.register("key1", "http://app", tx1).unwrap();
        registry.register("key2", "http://other", tx2).unwrap();

        let dropped = registry.drop_by_uri("http://app");
        assert_eq!(dropped, vec!["key1".to_string()]);
        assert!(registry.contains("key2"));
        assert!(!registry.contains("key1"));
    }
}
