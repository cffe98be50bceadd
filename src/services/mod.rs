pub mod chat_store;
pub mod memory_store;
pub mod notification_gateway;
pub mod notification_store;
pub mod presence;

// Re-export key types for convenience
pub use chat_store::{ChatSessionStore, PgChatSessionStore};
pub use memory_store::{MemoryChatStore, MemoryNotificationStore};
pub use notification_gateway::NotificationGateway;
pub use notification_store::{NotificationStore, PgNotificationStore};
pub use presence::PresenceTracker;
