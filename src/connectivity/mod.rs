pub mod monitor;

pub use monitor::{
    ConnectionState, ConnectivityMonitor, ReachabilityProbe, RemoteProbe, Transition,
};
