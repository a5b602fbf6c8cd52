//! Services: query client, presence tracking, polling, mod watching and notification.

pub mod mod_watcher;
pub mod notifier;
pub mod poller;
pub mod presence;
pub mod query;
pub mod store;

pub use mod_watcher::ModWatcher;
pub use notifier::RedisNotifier;
pub use poller::{Dispatcher, Poller};
pub use presence::PresenceTracker;
pub use query::QueryClient;
pub use store::{EventSink, ModSink, SessionStore};
