//! mqttgw-runtime: the long-running side of the gateway.
//!
//! Listeners feed one inbox; a single router applies records to the device
//! registry; a supervisor keeps one listener alive per device key; the
//! publisher handles one-shot outbound messages.

pub mod daemon;
pub mod inbox;
pub mod listener;
pub mod logging;
pub mod publisher;
pub mod router;
pub mod supervisor;

pub use daemon::{Gateway, run_daemon, spawn_gateway};
pub use inbox::{Dequeue, Inbox, InboxReceiver, InboxRecord, inbox};
pub use listener::{ListenerExit, run_listener, spawn_listener};
pub use publisher::{Publisher, VALIDATION_MESSAGE, ValidationError};
pub use router::{DEQUEUE_WAIT, Router, route_record};
pub use supervisor::{Supervisor, SupervisorCommand, SupervisorHandle, SupervisorOptions};
