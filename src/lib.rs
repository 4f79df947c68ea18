pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod pool;
pub mod protocol;
pub mod queue;
pub mod request;
pub mod service;
pub mod worker;

pub use cache::ThumbCache;
pub use config::Config;
pub use error::ThumbError;
pub use pool::{Generated, PoolManager, PoolStatus};
pub use request::{Extra, RequestId, ThumbOutcome};
pub use service::{ThumbnailHandle, ThumbnailService};
