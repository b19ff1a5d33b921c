//! Request dispatch and failover.

pub mod dispatcher;

pub use dispatcher::{DispatchOutcome, Dispatcher, UpstreamReply};
