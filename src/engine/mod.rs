//! The long-running tasks that drive the protocol for all connections in the table

pub mod receive;
pub mod reclaim;
pub mod send;
