//! Connection handling
//!
//! Each accepted socket becomes a [`Connection`]: a state machine that
//! parses the request, then either streams a definition out or appends an
//! upload into a feed. Connections never block; the event loop tells them
//! when to try again.

pub mod buffer;
pub mod connection;
pub mod error;
pub mod state;
pub mod transport;

pub use buffer::IoBuffer;
pub use connection::{Connection, StepContext, StepOutcome};
pub use error::SessionError;
pub use state::ConnectionState;
pub use transport::Transport;
