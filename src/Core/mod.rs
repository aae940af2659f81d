mod broker;
pub mod engine;
pub mod error;
pub mod loopback;

pub use engine::{
    CloseMode, Engine, ReceiverHandler, ReceiverLink, ReceiverOptions, ReceiverWork,
    SenderHandler, SenderLink, SenderOptions, SenderWork, WorkQueue,
};
pub use error::{ErrorCondition, LinkError, Result, TRANSFER_LIMIT_EXCEEDED};
pub use loopback::{LoopbackConfig, LoopbackEngine};
