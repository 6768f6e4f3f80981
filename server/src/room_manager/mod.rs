pub use self::room::{ConnectionId, MemberHandle};
pub use self::room_manager::{Membership, RoomManager};

mod room;
#[allow(clippy::module_inception)]
mod room_manager;
