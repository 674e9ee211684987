//! Watcher-driven event delivery.
//!
//! An [`EventManager`] owns the active watchers. For every (watcher, event
//! type) pair it runs a loop: wait on the watcher, deliver the result to each
//! subscriber in turn, drop subscribers that ask to be dropped. A loop ends
//! when its watcher declines to renew or nobody is listening any more.

mod error;
mod event;
mod manager;
pub mod metadata;
pub mod trusted_ca;
mod watcher;

pub use error::{EventError, WatchError};
pub use event::{EventData, EventPayload, PipeWriter, TrustedCaPipe};
pub use manager::{Config, EventHandler, EventManager};
pub use watcher::{WatchOutcome, Watcher, WatcherRegistry};
