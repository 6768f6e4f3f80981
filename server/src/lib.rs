/// Command line and environment configuration
pub mod config;
/// Accept loop and graceful shutdown
pub mod relay;
/// The registry of live rooms and their members
pub mod room_manager;
/// Lifecycle of a single connection, from handshake to departure
pub mod session;

pub use config::RelayConfig;
pub use relay::Relay;
pub use room_manager::RoomManager;
