mod chat_message;
mod chat_room;
mod chat_room_member;
mod user;

pub use chat_message::*;
pub use chat_room::*;
pub use chat_room_member::*;
pub use user::*;
