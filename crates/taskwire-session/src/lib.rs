//! taskwire-session: client-side engine for streamed agent tasks
//!
//! This crate turns the event stream of a task into a consistent transcript,
//! gates user actions through a session state machine, and makes every new
//! action supersede the stream that came before it.

pub mod buffer;
pub mod error;
pub mod events;
pub mod reconciler;
pub mod session;
pub mod state;
pub mod throttle;

pub use buffer::{TextBuffer, ToolCallBuffer, ToolCallSnapshot};
pub use error::{DispatchError, Error, Result};
pub use events::SessionUpdate;
pub use reconciler::{Approval, Change, Reconciler};
pub use session::{SessionConfig, TaskSession};
pub use state::{Action, SessionState, Signal};
pub use throttle::Throttle;
