pub mod accounts;
pub mod delivery_engine;
pub mod delivery_lock;
pub mod delivery_log;
pub mod destinations;
pub mod event_queue;
pub mod providers;
pub mod renderer;
pub mod session_registry;
pub mod thumbnail;

pub use delivery_engine::{DeliveryEngine, EngineError, EngineSettings};
pub use event_queue::{EventHandler, EventQueue, QueueConfig};
