use uuid::Uuid;

use super::error::{ForbiddenReason, SnapError};
use super::SnapService;
use crate::models::{InstanceState, NewSyncedSnap, SyncedSnap};
use crate::realtime::SnapEvent;

impl SnapService {
    /// Turns a completed instance's collage into the owner's synced snap and
    /// tells subscribed clients about it.
    pub async fn publish(&self, key: &str, user_id: i32) -> Result<SyncedSnap, SnapError> {
        let instance = self.instance_by_key(key).await?;
        if instance.created_by != user_id {
            return Err(SnapError::Forbidden(ForbiddenReason::NotOwner));
        }
        let collage = match (instance.state, instance.collage()) {
            (InstanceState::Complete, Some(collage)) => collage,
            _ => return Err(SnapError::Forbidden(ForbiddenReason::NotComplete)),
        };
        if self.store.find_synced_snap(instance.id).await?.is_some() {
            return Err(SnapError::Forbidden(ForbiddenReason::AlreadyPublished));
        }

        let snap = self
            .store
            .publish(NewSyncedSnap {
                id: Uuid::new_v4(),
                instance_id: instance.id,
                owner_id: instance.created_by,
                shape_id: instance.shape_id,
                image_url: collage.url,
                created_at: self.clock.now(),
            })
            .await?;
        log::info!("{} published as synced snap {}", key, snap.id);

        self.announce(SnapEvent::PublishSnap, key).await;
        Ok(snap)
    }
}
