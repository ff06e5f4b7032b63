//! Browser bridge processes.
//!
//! - [`ports`]: the fixed port range bridges listen on
//! - [`supervisor`]: starting, tracking and stopping bridges
//! - [`orphans`]: cleanup of bridges left behind by a previous run

pub mod orphans;
pub mod ports;
pub mod supervisor;

pub use orphans::{find_processes, sweep_orphans};
pub use ports::{PortError, PortPool};
pub use supervisor::{
    BridgeError, BridgeExit, BridgeInfo, BridgeLauncher, BridgeSupervisor, TtydLauncher,
};
