//! TCP transport for the node, journal and coordination services.
//!
//! Each service is a request enum, a response enum carrying either a result or
//! an [`Error`](crate::error::Error), a server-side [`RpcHandler`] and a client
//! implementing the same trait as the local component. Frames are
//! length-prefixed bincode (see [`frame`]).

pub mod client;
pub mod frame;
pub mod journal;
pub mod messages;
pub mod node;
pub mod server;

pub use client::RpcClient;
pub use journal::{JournalClient, JournalService};
pub use messages::{
    CoordRequest, CoordResponse, JournalRequest, JournalResponse, NodeRequest, NodeResponse,
};
pub use node::{NodeClient, NodeService};
pub use server::{RpcHandler, RpcServer};
