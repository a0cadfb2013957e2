// Module naming follows project convention (BQueue = adaptive batching queue, B-Queue)
#[allow(non_snake_case)]
pub mod BQueue {
    pub mod Buffer {
        pub mod Buffer;
        pub mod Buffer_impl;
        mod debug;
        pub mod layout;
        pub use Buffer::{AdaptiveQueue, RingBuffer, SlotElement}; // re-export for stable path
    }
    pub mod Structs {
        pub mod Buffer_Structs;
        pub use Buffer_Structs::{BatchConfig, QueueStats, Wait}; // re-export for stable path
    }

    mod builder;
    mod consumer;
    mod producer;

    pub use builder::QueueBuilder;
    pub use consumer::Consumer;
    pub use producer::Producer;
}

#[allow(non_snake_case)]
pub mod Messaging {
    pub mod args;
    pub mod message;

    mod builder;
    mod consumer;
    mod producer;

    pub use builder::ChannelBuilder;
    pub use args::{ArgRef, ArgSpan, ArgsChannel}; // re-export for stable path
    pub use consumer::{run_calls, Calls, MessageConsumer};
    pub use message::{Address, Executor, Message, MessageQueue};
    pub use producer::{MessageProducer, PushCall};
}

#[allow(non_snake_case)]
pub mod Actor {
    mod builder;
    pub mod mailbox;

    pub use builder::{MailboxBuilder, MailboxConfig};
    pub use mailbox::{ActorGuard, Mailbox, MailboxStats};
}

#[allow(non_snake_case)]
pub mod Core {
    pub mod futex;
    pub mod pool;
    pub mod scheduler;

    pub use pool::{Job, TaskPool, ThreadPool};
    pub use scheduler::{Drainable, Scheduler};
}

#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

pub mod error;

pub use error::{CallError, ConfigError};
