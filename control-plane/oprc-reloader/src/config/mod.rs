mod types;

pub use types::{FetchConfig, ReloaderConfig, RequeueConfig};
