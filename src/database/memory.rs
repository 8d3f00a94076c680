use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CaptureStamp, ConflictKind, ParticipantJoin, SnapStore, StoreError};
use crate::models::{
    AssemblyClaim, CollageRef, InstanceParticipant, InstanceState, NewInstanceParticipant,
    NewSnapInstance, NewSyncedSnap, SnapInstance, SyncedSnap, User,
};

#[derive(Default)]
struct Tables {
    users: HashMap<i32, User>,
    instances: HashMap<Uuid, SnapInstance>,
    participants: Vec<InstanceParticipant>,
    synced: HashMap<Uuid, SyncedSnap>,
}

/// Store used when no `DATABASE_URL` is configured, and by tests. One mutex
/// over all tables makes every call atomic.
#[derive(Default)]
pub struct MemorySnapStore {
    tables: Mutex<Tables>,
}

impl MemorySnapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let tables = Tables {
            users: users.into_iter().map(|u| (u.id, u)).collect(),
            ..Tables::default()
        };
        Self {
            tables: Mutex::new(tables),
        }
    }

    pub async fn insert_user(&self, user: User) {
        self.tables.lock().await.users.insert(user.id, user);
    }

    /// Rewrites an instance's timer start; lets callers replay a countdown
    /// that began in the past.
    pub async fn backdate_timer(&self, instance_id: Uuid, start: DateTime<Utc>) {
        if let Some(instance) = self.tables.lock().await.instances.get_mut(&instance_id) {
            instance.timer_start_at = Some(start);
        }
    }
}

impl Tables {
    fn live_instance(&self, instance_id: Uuid) -> Option<&SnapInstance> {
        self.instances.get(&instance_id).filter(|i| !i.is_deleted)
    }

    fn live_instance_mut(&mut self, instance_id: Uuid) -> Result<&mut SnapInstance, StoreError> {
        self.instances
            .get_mut(&instance_id)
            .filter(|i| !i.is_deleted)
            .ok_or(StoreError::NotFound)
    }
}

fn expect_state(instance: &SnapInstance, expected: InstanceState) -> Result<(), StoreError> {
    if instance.state == expected {
        Ok(())
    } else {
        Err(StoreError::StaleState {
            expected,
            actual: instance.state,
        })
    }
}

#[async_trait]
impl SnapStore for MemorySnapStore {
    async fn find_user(&self, user_id: i32) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().await.users.get(&user_id).cloned())
    }

    async fn create_instance(
        &self,
        instance: NewSnapInstance,
        participants: Vec<NewInstanceParticipant>,
    ) -> Result<SnapInstance, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables
            .instances
            .values()
            .any(|i| i.instance_key == instance.instance_key)
        {
            return Err(StoreError::Conflict(ConflictKind::DuplicateKey));
        }

        let created = SnapInstance {
            id: instance.id,
            instance_key: instance.instance_key,
            created_by: instance.created_by,
            shape_id: instance.shape_id,
            state: instance.state,
            timer_start_at: None,
            countdown_secs: instance.countdown_secs,
            assembly_claimed: false,
            collage_id: None,
            collage_url: None,
            collage_completed_at: None,
            is_deleted: false,
            created_at: instance.created_at,
        };
        tables.instances.insert(created.id, created.clone());

        for p in participants {
            tables.participants.push(InstanceParticipant {
                id: p.id,
                instance_id: p.instance_id,
                user_id: p.user_id,
                position_id: p.position_id,
                position_name: p.position_name,
                is_owner: p.is_owner,
                is_joined: p.is_joined,
                joined_at: p.joined_at,
                image_ref: None,
                compositing_id: None,
                captured_at: None,
            });
        }
        Ok(created)
    }

    async fn find_instance(&self, instance_id: Uuid) -> Result<Option<SnapInstance>, StoreError> {
        Ok(self.tables.lock().await.live_instance(instance_id).cloned())
    }

    async fn find_instance_by_key(&self, key: &str) -> Result<Option<SnapInstance>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .instances
            .values()
            .find(|i| i.instance_key == key && !i.is_deleted)
            .cloned())
    }

    async fn participants(&self, instance_id: Uuid) -> Result<Vec<InstanceParticipant>, StoreError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<_> = tables
            .participants
            .iter()
            .filter(|p| p.instance_id == instance_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.position_id);
        Ok(rows)
    }

    async fn find_participant(
        &self,
        instance_id: Uuid,
        user_id: i32,
    ) -> Result<Option<InstanceParticipant>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .participants
            .iter()
            .find(|p| p.instance_id == instance_id && p.user_id == user_id)
            .cloned())
    }

    async fn join_participant(&self, join: ParticipantJoin) -> Result<InstanceParticipant, StoreError> {
        let mut tables = self.tables.lock().await;
        expect_state(tables.live_instance_mut(join.instance_id)?, InstanceState::Open)?;

        let own = tables
            .participants
            .iter()
            .position(|p| p.instance_id == join.instance_id && p.user_id == join.user_id);
        if let Some(idx) = own {
            if tables.participants[idx].is_joined {
                return Err(StoreError::Conflict(ConflictKind::AlreadyJoined));
            }
        }

        let taken = tables.participants.iter().any(|p| {
            p.instance_id == join.instance_id
                && p.position_id == join.position_id
                && p.user_id != join.user_id
        });
        if taken {
            return Err(StoreError::Conflict(ConflictKind::PositionTaken));
        }

        let row = match own {
            Some(idx) => {
                let row = &mut tables.participants[idx];
                row.position_id = join.position_id;
                row.position_name = join.position_name;
                row.is_joined = true;
                row.joined_at = Some(join.joined_at);
                row.clone()
            }
            None => {
                let row = InstanceParticipant {
                    id: Uuid::new_v4(),
                    instance_id: join.instance_id,
                    user_id: join.user_id,
                    position_id: join.position_id,
                    position_name: join.position_name,
                    is_owner: false,
                    is_joined: true,
                    joined_at: Some(join.joined_at),
                    image_ref: None,
                    compositing_id: None,
                    captured_at: None,
                };
                tables.participants.push(row.clone());
                row
            }
        };
        Ok(row)
    }

    async fn start_timer(&self, instance_id: Uuid, at: DateTime<Utc>) -> Result<SnapInstance, StoreError> {
        let mut tables = self.tables.lock().await;
        let instance = tables.live_instance_mut(instance_id)?;
        expect_state(instance, InstanceState::Open)?;
        instance.state = InstanceState::TimerRunning;
        instance.timer_start_at = Some(at);
        Ok(instance.clone())
    }

    async fn stamp_capture(&self, stamp: CaptureStamp) -> Result<InstanceParticipant, StoreError> {
        let mut tables = self.tables.lock().await;
        expect_state(
            tables.live_instance_mut(stamp.instance_id)?,
            InstanceState::TimerRunning,
        )?;

        let row = tables
            .participants
            .iter_mut()
            .find(|p| p.instance_id == stamp.instance_id && p.user_id == stamp.user_id)
            .ok_or(StoreError::NotFound)?;
        if row.captured_at.is_some() {
            return Err(StoreError::Conflict(ConflictKind::AlreadyCaptured));
        }
        row.image_ref = Some(stamp.image_ref);
        row.compositing_id = Some(stamp.compositing_id);
        row.captured_at = Some(stamp.captured_at);
        Ok(row.clone())
    }

    async fn claim_assembly(&self, instance_id: Uuid, required: usize) -> Result<AssemblyClaim, StoreError> {
        let mut tables = self.tables.lock().await;
        let captured = tables
            .participants
            .iter()
            .filter(|p| p.instance_id == instance_id && p.captured_at.is_some())
            .count();

        let instance = tables.live_instance_mut(instance_id)?;
        let all_captured = captured >= required;
        let claimed = all_captured
            && !instance.assembly_claimed
            && instance.state == InstanceState::TimerRunning;
        if claimed {
            instance.assembly_claimed = true;
        }
        Ok(AssemblyClaim {
            captured,
            all_captured,
            claimed,
        })
    }

    async fn complete_instance(
        &self,
        instance_id: Uuid,
        collage: &CollageRef,
    ) -> Result<SnapInstance, StoreError> {
        let mut tables = self.tables.lock().await;
        let instance = tables.live_instance_mut(instance_id)?;
        expect_state(instance, InstanceState::TimerRunning)?;
        instance.state = InstanceState::Complete;
        instance.collage_id = Some(collage.id);
        instance.collage_url = Some(collage.url.clone());
        instance.collage_completed_at = Some(collage.completed_at);
        Ok(instance.clone())
    }

    async fn fail_instance(&self, instance_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let instance = tables.live_instance_mut(instance_id)?;
        if instance.state != InstanceState::TimerRunning {
            return Ok(false);
        }
        instance.state = InstanceState::Error;
        Ok(true)
    }

    async fn find_synced_snap(&self, instance_id: Uuid) -> Result<Option<SyncedSnap>, StoreError> {
        Ok(self.tables.lock().await.synced.get(&instance_id).cloned())
    }

    async fn publish(&self, snap: NewSyncedSnap) -> Result<SyncedSnap, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.synced.contains_key(&snap.instance_id) {
            return Err(StoreError::Conflict(ConflictKind::AlreadyPublished));
        }
        let record = SyncedSnap {
            id: snap.id,
            instance_id: snap.instance_id,
            owner_id: snap.owner_id,
            shape_id: snap.shape_id,
            image_url: snap.image_url,
            created_at: snap.created_at,
        };
        tables.synced.insert(record.instance_id, record.clone());
        Ok(record)
    }
}
