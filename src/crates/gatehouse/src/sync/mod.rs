//! Suspension primitives shared by approval waits and bridge input requests

pub mod cell;
pub mod pending;

pub use cell::{ResolutionCell, WaitOutcome};
pub use pending::{AlreadyRegistered, PendingTable, PendingWait};
