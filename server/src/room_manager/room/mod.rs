mod member_handle;
#[allow(clippy::module_inception)]
mod room;

pub use self::member_handle::{ConnectionId, MemberHandle};
pub use self::room::{deliver_to, Room};
