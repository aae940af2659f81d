mod builder;
mod debug;
mod receiver;
mod sender;
mod state;

pub use builder::LinkBuilder;
pub use receiver::Receiver;
pub use crate::Core::error::TRANSFER_LIMIT_EXCEEDED;
pub use sender::Sender;
pub use state::LinkState;
pub use Buffer::{BoundedBuffer, DEFAULT_BUFFER_CAPACITY};
pub use Structs::{Message, MessageMeta, GROUP_SEQUENCE_END};

pub(crate) use receiver::ReceiverShared;
pub(crate) use sender::SenderShared;

pub mod Buffer {
    pub mod Buffer;
    pub mod Buffer_impl;
    pub use Buffer::{BoundedBuffer, DEFAULT_BUFFER_CAPACITY}; // re-export for stable path
}

pub mod Structs {
    pub mod Message_Structs;
    pub use Message_Structs::{Message, MessageMeta, GROUP_SEQUENCE_END}; // re-export for stable path
}
