//! Child process management
//!
//! - [`managed`] owns the long-running background server.
//! - [`invoke`] runs a client to completion with bounded time.

pub mod invoke;
pub mod managed;

pub use invoke::{invoke, Invocation, InvokeSpec};
pub use managed::{ManagedProcess, SpawnSpec};
