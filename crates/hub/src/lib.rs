//! Agent session registry and request/response multiplexer.
//!
//! The Hub owns every live agent's bounded outbound queue, demultiplexes
//! the inbound frame stream, and correlates replies to waiting callers via
//! per-command subscriptions. `CommandClient` wraps the subscribe → send →
//! await procedure every command-issuing caller follows.

pub mod command;
pub mod hub;
pub mod session;
pub mod sink;

pub use command::CommandClient;
pub use hub::{Hub, ResponseSubscription};
pub use session::{AgentConnection, DEFAULT_OUTBOUND_CAPACITY};
pub use sink::{EventSink, NoopSink};
