//! Client Dispatcher: the per-client playback state machine that paces
//! binary frames to a connected client under play/pause/seek control
//! (spec.md §4.5).

mod dispatcher;
mod protocol;
mod transport;

pub use dispatcher::{ClientDispatcher, DispatcherConfig};
pub use protocol::{parse_control_message, ControlMessage, EventMessage};
pub use transport::{ClientTransport, RecvOutcome};
