pub mod connection_state;
pub mod net_helper;
pub mod wsstream;
