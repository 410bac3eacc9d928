//! stream-binder — logical message channels bound to pluggable broker backends.

pub mod binder;
pub mod channel;
pub mod config;
pub mod error;
pub mod message;
pub mod partition;
pub mod properties;
pub mod resolver;

pub use binder::{Binder, BinderRegistry, Binding, BindingKind, LocalBinder};
pub use channel::{BindingState, MessageChannel};
pub use config::{RebindPolicy, StreamConfig};
pub use error::{Error, Result};
pub use message::Message;
pub use resolver::{ChannelName, ChannelResolver};
