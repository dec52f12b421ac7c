pub mod errors;
pub mod ids;
pub mod message;
pub mod store;

pub use errors::ChatError;
pub use ids::{ConnectionId, MessageId, UserId};
pub use message::{Frame, FrameKind, Message, MessageView};
pub use store::MessageStore;
