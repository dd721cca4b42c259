use chat_core::{ChatError, ChatErrorCategory, Participant, generate_display_name};
use chat_platform::{KeyValueStore, KeyValueStoreError, ScopedKeyValueStore};
use tracing::{debug, info};

use crate::transport::PubSubService;

pub const PARTICIPANT_ID_KEY: &str = "participant-id";
pub const DISPLAY_NAME_KEY: &str = "display-name";

/// Persisted local identity, scoped to one channel.
pub struct IdentityManager<K: KeyValueStore> {
    store: ScopedKeyValueStore<K>,
}

impl<K: KeyValueStore> IdentityManager<K> {
    pub fn new(store: K, namespace: impl Into<String>) -> Self {
        Self {
            store: ScopedKeyValueStore::new(store, namespace),
        }
    }

    /// Persisted participant id, or the node's peer id persisted on first use.
    pub fn resolve_identity<S: PubSubService>(&self, service: &S) -> Result<String, ChatError> {
        if let Some(id) = self
            .store
            .get_optional(PARTICIPANT_ID_KEY)
            .map_err(|err| map_store_error("get_participant_id", PARTICIPANT_ID_KEY, err))?
        {
            debug!(participant_id = %id, "restored persisted identity");
            return Ok(id);
        }

        let id = service.local_peer_id();
        self.store
            .set(PARTICIPANT_ID_KEY, &id)
            .map_err(|err| map_store_error("set_participant_id", PARTICIPANT_ID_KEY, err))?;
        info!(participant_id = %id, "persisted new identity");
        Ok(id)
    }

    pub fn resolve_display_name(&self, participant_id: &str) -> Result<String, ChatError> {
        let stored = self
            .store
            .get_optional(DISPLAY_NAME_KEY)
            .map_err(|err| map_store_error("get_display_name", DISPLAY_NAME_KEY, err))?;
        Ok(stored.unwrap_or_else(|| generate_display_name(participant_id)))
    }

    pub fn resolve_participant<S: PubSubService>(
        &self,
        service: &S,
    ) -> Result<Participant, ChatError> {
        let id = self.resolve_identity(service)?;
        let name = self.resolve_display_name(&id)?;
        Ok(Participant::new(id, name))
    }

    /// Persist a display name override. Returns the trimmed name.
    pub fn set_display_name(&self, name: &str) -> Result<String, ChatError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::new(
                ChatErrorCategory::Config,
                "invalid_display_name",
                "display name must not be empty",
            ));
        }

        self.store
            .set(DISPLAY_NAME_KEY, name)
            .map_err(|err| map_store_error("set_display_name", DISPLAY_NAME_KEY, err))?;
        Ok(name.to_owned())
    }
}

fn map_store_error(operation: &str, key: &str, err: KeyValueStoreError) -> ChatError {
    match err {
        KeyValueStoreError::NotFound => ChatError::new(
            ChatErrorCategory::Storage,
            "store_key_not_found",
            format!("key '{key}' missing during {operation}"),
        ),
        KeyValueStoreError::Unavailable(message) => ChatError::new(
            ChatErrorCategory::Storage,
            "store_unavailable",
            format!("key-value store unavailable during {operation}: {message}"),
        ),
        KeyValueStoreError::Backend(message) => ChatError::new(
            ChatErrorCategory::Storage,
            "store_error",
            format!("key-value store backend error during {operation}: {message}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRelay;
    use chat_platform::InMemoryKeyValueStore;

    #[test]
    fn persists_peer_id_on_first_resolve() {
        let store = InMemoryKeyValueStore::default();
        let relay = InMemoryRelay::with_peer_id("peer-a");
        let identity = IdentityManager::new(store.clone(), "my-app");

        assert_eq!(identity.resolve_identity(&relay).expect("resolve"), "peer-a");

        let other_node = InMemoryRelay::with_peer_id("peer-b");
        let reopened = IdentityManager::new(store, "my-app");
        assert_eq!(
            reopened.resolve_identity(&other_node).expect("resolve again"),
            "peer-a"
        );
    }

    #[test]
    fn generated_name_until_overridden() {
        let identity = IdentityManager::new(InMemoryKeyValueStore::default(), "my-app");
        let generated = identity
            .resolve_display_name("peer-a")
            .expect("resolve name");
        assert_eq!(generated, generate_display_name("peer-a"));

        let stored = identity
            .set_display_name("  Alice  ")
            .expect("rename should work");
        assert_eq!(stored, "Alice");
        assert_eq!(
            identity.resolve_display_name("peer-a").expect("resolve"),
            "Alice"
        );
    }

    #[test]
    fn rejects_blank_display_name() {
        let identity = IdentityManager::new(InMemoryKeyValueStore::default(), "my-app");
        let err = identity
            .set_display_name("   ")
            .expect_err("blank name must fail");
        assert_eq!(err.code, "invalid_display_name");
    }

    #[test]
    fn maps_store_outage_to_storage_error() {
        let err = map_store_error(
            "get_participant_id",
            PARTICIPANT_ID_KEY,
            KeyValueStoreError::Unavailable("disk gone".to_owned()),
        );
        assert_eq!(err.category, ChatErrorCategory::Storage);
        assert_eq!(err.code, "store_unavailable");
    }
}
