//! Request orchestration: statement execution, result channels,
//! execution options and responses.

pub mod channel;
pub mod executor;
pub mod options;
pub mod response;

pub use channel::{ChannelStats, DataChannel, ResultStoreChannel, StreamChannel, Writer};
pub use executor::{Executor, JobHandle};
pub use options::Options;
pub use response::Response;
