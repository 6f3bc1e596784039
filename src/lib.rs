use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;

pub mod catalog;
pub mod error;
pub mod formats;
pub mod handlers;
pub mod ratelimit;
pub mod util;
pub mod ytdlp;

pub use ratelimit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub rate_limiter: Arc<RateLimiter>,
    pub download_semaphore: Arc<Semaphore>,
    pub trust_proxy_headers: bool,
    pub transfer_dir: PathBuf,
}
