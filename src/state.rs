use std::sync::Arc;

use axum::extract::FromRef;

use crate::auth::AuthKeys;
use crate::snaps::SnapService;

#[derive(FromRef, Clone)]
pub struct AppState {
    pub snaps: Arc<SnapService>,
    pub keys: AuthKeys,
}
