//! Monitor and administer MySQL InnoDB Cluster nodes through `mysqlsh`.
//!
//! [`domain::monitor::ClusterMonitor`] is the entry point: it owns one
//! [`domain::session::NodeSession`] per node, polls them on a cadence and
//! runs operator commands from [`domain::catalog::CommandCatalog`].

pub mod config;
pub mod domain;
pub mod logging;
pub mod tools;
