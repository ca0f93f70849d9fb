#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod allocator;
mod cache;
mod config;
mod error;
mod id;
mod lock;
mod pattern;
#[cfg(feature = "async-tokio")]
mod runtime;
mod store;
mod time;

pub use crate::allocator::*;
pub use crate::cache::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::id::*;
pub use crate::lock::*;
pub use crate::pattern::*;
#[cfg(feature = "async-tokio")]
pub use crate::runtime::*;
pub use crate::store::*;
pub use crate::time::*;
