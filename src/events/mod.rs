//! Status broadcast bus: tagged event types, fan-out, feed server and the
//! reference aggregating consumer.

pub mod bus;
pub mod monitor;
pub mod server;
pub mod types;

pub use bus::StatusBus;
pub use monitor::{JobView, StreamMonitor, Totals};
pub use server::serve_feed;
pub use types::{JobMessage, StatusEvent};
