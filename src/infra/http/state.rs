use std::sync::Arc;

use crate::application::documents::DocumentService;
use crate::application::tasks::TaskPipeline;
use crate::cache::DocumentCache;
use crate::limiter::{AdaptiveController, LoadTracker, RateLimiter};

/// Everything the request layer needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub documents: Arc<DocumentService>,
    pub cache: Arc<DocumentCache>,
    pub pipeline: Arc<TaskPipeline>,
    pub limiter: Arc<RateLimiter>,
    pub adaptive: Arc<AdaptiveController>,
    pub load: Arc<LoadTracker>,
}
