//! Synchronized multi-party snaps.
//!
//! An owner opens an instance of a shape, participants claim its positions,
//! the owner starts a shared countdown and every participant submits one
//! image once it has elapsed. The capture that completes the set assembles
//! the collage; the HTTP layer then fans the outcome out through the relay.

mod capture;
mod catalog;
mod clock;
mod collage;
mod error;
mod lifecycle;
mod publish;


use std::sync::Arc;

use crate::database::SnapStore;
use crate::media::{CompositingService, ObjectStorage};
use crate::realtime::Broadcaster;

pub use capture::CaptureReport;
pub use catalog::{validate_shape, CatalogError, ShapeCatalog};
pub use clock::{Clock, SystemClock};
pub use collage::build_collage_request;
pub use error::{ForbiddenReason, SnapError};

#[derive(Debug, Clone)]
pub struct SnapSettings {
    /// Bucket captured images are stored in.
    pub bucket: String,
    pub default_countdown_secs: i32,
}

impl Default for SnapSettings {
    fn default() -> Self {
        Self {
            bucket: "snaps".to_string(),
            default_countdown_secs: 10,
        }
    }
}

/// Everything a snap flow touches, injected once at startup.
pub struct SnapService {
    store: Arc<dyn SnapStore>,
    catalog: Arc<ShapeCatalog>,
    storage: Arc<dyn ObjectStorage>,
    compositor: Arc<dyn CompositingService>,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
    settings: SnapSettings,
}

impl SnapService {
    pub fn new(
        store: Arc<dyn SnapStore>,
        catalog: Arc<ShapeCatalog>,
        storage: Arc<dyn ObjectStorage>,
        compositor: Arc<dyn CompositingService>,
        broadcaster: Arc<dyn Broadcaster>,
        settings: SnapSettings,
    ) -> Self {
        Self {
            store,
            catalog,
            storage,
            compositor,
            broadcaster,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn catalog(&self) -> &ShapeCatalog {
        &self.catalog
    }
}
