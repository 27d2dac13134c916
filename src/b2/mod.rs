// B2 远程存储模块

pub mod api;
pub mod client;
pub mod error;
pub mod memory;
pub mod types;

pub use api::B2Api;
pub use client::{Bucket, Client};
pub use error::{B2Error, Result};
pub use memory::{CallStats, MemoryB2, StoredObject};
pub use types::*;
