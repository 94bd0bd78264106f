//! The uniform driver surface.
//!
//! [`DriverConnection`] parses a connection string into a [`ConnectionDescriptor`] and
//! opens the transport it selects. [`DriverCommand`] holds SQL text and a
//! [`ParameterList`] and executes on that transport, returning row counts, scalars, or a
//! [`ResultCursor`] that reads the same way whether rows stream from the engine or were
//! buffered from an HTTP response.

mod asynchronous;
mod command;
mod connection;
mod cursor;
mod descriptor;
mod parameter;
mod transaction;

pub use asynchronous::AsyncDriver;
pub use command::{DriverCommand, ExecuteOutcome};
pub use connection::{ConnectionState, DriverConnection};
pub use cursor::{BufferedRows, ResultCursor, RowRef};
pub use descriptor::{ConnectionDescriptor, TransportMode};
pub use parameter::{Parameter, ParameterList};
pub use transaction::{IsolationLevel, Transaction};
