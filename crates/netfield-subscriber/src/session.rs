//! Session identity: targeting parameters plus the per-connection client id.

/// Identity for one logical session. Outlives individual sockets; the
/// `client_id` is regenerated on every connection attempt.
#[derive(Debug, Clone)]
pub(crate) struct SessionIdentity {
    /// Correlation token for outgoing control frames. Not a security token.
    pub client_id: String,
    pub device_id: String,
    pub topic: String,
    /// Opaque bearer value, presented once per connection during handshake.
    pub credential: String,
}

impl SessionIdentity {
    pub fn new(device_id: String, topic: String, credential: String) -> Self {
        Self {
            client_id: new_client_id(),
            device_id,
            topic,
            credential,
        }
    }

    /// Fresh client id for a new connection attempt.
    pub fn rotate_client_id(&mut self) {
        self.client_id = new_client_id();
    }

    /// Point the session at a different device/topic pair. Takes effect with
    /// the next `sub` frame.
    pub fn retarget(&mut self, device_id: String, topic: String) {
        self.device_id = device_id;
        self.topic = topic;
    }
}

fn new_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_is_nonempty_and_unique() {
        let a = SessionIdentity::new("d".into(), "/t".into(), "c".into());
        let b = SessionIdentity::new("d".into(), "/t".into(), "c".into());
        assert!(!a.client_id.is_empty());
        assert_ne!(a.client_id, b.client_id);
    }

    #[test]
    fn rotate_replaces_client_id() {
        let mut id = SessionIdentity::new("d".into(), "/t".into(), "c".into());
        let before = id.client_id.clone();
        id.rotate_client_id();
        assert_ne!(before, id.client_id);
        assert!(!id.client_id.is_empty());
    }

    #[test]
    fn retarget_updates_device_and_topic_only() {
        let mut id = SessionIdentity::new("d1".into(), "/t1".into(), "c".into());
        let client_id = id.client_id.clone();
        id.retarget("d2".into(), "/t2".into());
        assert_eq!(id.device_id, "d2");
        assert_eq!(id.topic, "/t2");
        assert_eq!(id.client_id, client_id);
        assert_eq!(id.credential, "c");
    }
}
