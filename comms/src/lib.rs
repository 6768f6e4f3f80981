/// Room keys and how they are carried in the connection path
pub mod room_key;
/// Implementation of room connections over WebSocket.
/// Requires 'server' or 'client' features to be enabled and will bring in tokio dependency alongside with other dependencies
pub mod transport;

pub use room_key::{RoomKey, RoomKeyError};
