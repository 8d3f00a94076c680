//! Persistence for snap instances and their participants.
//!
//! Every mutation that other requests may race on is expressed as a single
//! store call, so each backend can make it atomic: Postgres through a
//! transaction holding the instance row lock, the in-memory store through
//! one mutex.

mod db;
mod memory;
mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    AssemblyClaim, CollageRef, InstanceParticipant, InstanceState, NewInstanceParticipant,
    NewSnapInstance, NewSyncedSnap, SnapInstance, SyncedSnap, User,
};

pub use db::{establish_connection, DbPool};
pub use memory::MemorySnapStore;
pub use pg::PgSnapStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    AlreadyJoined,
    PositionTaken,
    AlreadyCaptured,
    AlreadyPublished,
    DuplicateKey,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("{0:?}")]
    Conflict(ConflictKind),
    /// A conditional update found the instance in a different state than
    /// the one the caller validated against.
    #[error("instance is {actual}, expected {expected}")]
    StaleState {
        expected: InstanceState,
        actual: InstanceState,
    },
    #[error("record not found")]
    NotFound,
}

/// A participant claiming a position in an open instance.
#[derive(Debug, Clone)]
pub struct ParticipantJoin {
    pub instance_id: Uuid,
    pub user_id: i32,
    pub position_id: i32,
    pub position_name: String,
    pub joined_at: DateTime<Utc>,
}

/// A successful capture, stamped onto the participant row exactly once.
#[derive(Debug, Clone)]
pub struct CaptureStamp {
    pub instance_id: Uuid,
    pub user_id: i32,
    pub image_ref: String,
    pub compositing_id: String,
    pub captured_at: DateTime<Utc>,
}

#[async_trait]
pub trait SnapStore: Send + Sync {
    async fn find_user(&self, user_id: i32) -> Result<Option<User>, StoreError>;

    async fn create_instance(
        &self,
        instance: NewSnapInstance,
        participants: Vec<NewInstanceParticipant>,
    ) -> Result<SnapInstance, StoreError>;

    async fn find_instance(&self, instance_id: Uuid) -> Result<Option<SnapInstance>, StoreError>;

    async fn find_instance_by_key(&self, key: &str) -> Result<Option<SnapInstance>, StoreError>;

    async fn participants(&self, instance_id: Uuid) -> Result<Vec<InstanceParticipant>, StoreError>;

    async fn find_participant(
        &self,
        instance_id: Uuid,
        user_id: i32,
    ) -> Result<Option<InstanceParticipant>, StoreError>;

    /// Marks the user joined on `position_id`, inserting a participant row
    /// when the user had no invitation. Fails with `AlreadyJoined` or
    /// `PositionTaken` conflicts, or `StaleState` once the instance left
    /// `Open`.
    async fn join_participant(&self, join: ParticipantJoin) -> Result<InstanceParticipant, StoreError>;

    /// `Open -> TimerRunning`, stamping the timer start.
    async fn start_timer(&self, instance_id: Uuid, at: DateTime<Utc>) -> Result<SnapInstance, StoreError>;

    /// Sets `captured_at` on a participant whose stamp is still empty.
    async fn stamp_capture(&self, stamp: CaptureStamp) -> Result<InstanceParticipant, StoreError>;

    /// Counts captured participants under the instance lock and, when the
    /// count reaches `required`, flips `assembly_claimed` for the first
    /// caller only.
    async fn claim_assembly(&self, instance_id: Uuid, required: usize) -> Result<AssemblyClaim, StoreError>;

    /// `TimerRunning -> Complete`, attaching the collage reference.
    async fn complete_instance(
        &self,
        instance_id: Uuid,
        collage: &CollageRef,
    ) -> Result<SnapInstance, StoreError>;

    /// `TimerRunning -> Error`. Returns false when the instance was not
    /// running (already terminal or never started).
    async fn fail_instance(&self, instance_id: Uuid) -> Result<bool, StoreError>;

    async fn find_synced_snap(&self, instance_id: Uuid) -> Result<Option<SyncedSnap>, StoreError>;

    async fn publish(&self, snap: NewSyncedSnap) -> Result<SyncedSnap, StoreError>;
}
