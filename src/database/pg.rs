use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::deadpool::Object;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use super::{CaptureStamp, ConflictKind, DbPool, ParticipantJoin, SnapStore, StoreError};
use crate::models::{
    AssemblyClaim, CollageRef, InstanceParticipant, InstanceState, NewInstanceParticipant,
    NewSnapInstance, NewSyncedSnap, SnapInstance, SyncedSnap, User,
};
use crate::schema::{snap_instances, snap_participants, synced_snaps};

pub struct PgSnapStore {
    pool: DbPool,
}

impl PgSnapStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<Object<AsyncPgConnection>, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

fn conflict_on_unique(e: DieselError, kind: ConflictKind) -> StoreError {
    match e {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => StoreError::Conflict(kind),
        other => StoreError::Database(other),
    }
}

/// Locks the instance row and checks it is still in `expected`.
async fn lock_in_state(
    instance_id: Uuid,
    expected: InstanceState,
    conn: &mut AsyncPgConnection,
) -> Result<SnapInstance, StoreError> {
    let instance = SnapInstance::lock(instance_id, conn)
        .await?
        .ok_or(StoreError::NotFound)?;
    if instance.state != expected {
        return Err(StoreError::StaleState {
            expected,
            actual: instance.state,
        });
    }
    Ok(instance)
}

#[async_trait]
impl SnapStore for PgSnapStore {
    async fn find_user(&self, user_id: i32) -> Result<Option<User>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(User::find_by_id(user_id, &mut conn).await?)
    }

    async fn create_instance(
        &self,
        instance: NewSnapInstance,
        participants: Vec<NewInstanceParticipant>,
    ) -> Result<SnapInstance, StoreError> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<_, StoreError, _>(move |conn| {
            async move {
                let created = diesel::insert_into(snap_instances::table)
                    .values(&instance)
                    .returning(SnapInstance::as_returning())
                    .get_result(conn)
                    .await
                    .map_err(|e| conflict_on_unique(e, ConflictKind::DuplicateKey))?;

                diesel::insert_into(snap_participants::table)
                    .values(&participants)
                    .execute(conn)
                    .await?;

                Ok(created)
            }
            .scope_boxed()
        })
        .await
    }

    async fn find_instance(&self, instance_id: Uuid) -> Result<Option<SnapInstance>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(SnapInstance::find(instance_id, &mut conn).await?)
    }

    async fn find_instance_by_key(&self, key: &str) -> Result<Option<SnapInstance>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(SnapInstance::find_by_key(key, &mut conn).await?)
    }

    async fn participants(&self, instance_id: Uuid) -> Result<Vec<InstanceParticipant>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(snap_participants::table
            .filter(snap_participants::instance_id.eq(instance_id))
            .select(InstanceParticipant::as_select())
            .order_by(snap_participants::position_id.asc())
            .load(&mut conn)
            .await?)
    }

    async fn find_participant(
        &self,
        instance_id: Uuid,
        user_id: i32,
    ) -> Result<Option<InstanceParticipant>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(InstanceParticipant::find(instance_id, user_id, &mut conn).await?)
    }

    async fn join_participant(&self, join: ParticipantJoin) -> Result<InstanceParticipant, StoreError> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<_, StoreError, _>(move |conn| {
            async move {
                lock_in_state(join.instance_id, InstanceState::Open, conn).await?;

                let own = InstanceParticipant::find(join.instance_id, join.user_id, conn).await?;
                if own.as_ref().is_some_and(|p| p.is_joined) {
                    return Err(StoreError::Conflict(ConflictKind::AlreadyJoined));
                }

                if let Some(holder) =
                    InstanceParticipant::holder_of(join.instance_id, join.position_id, conn).await?
                {
                    if holder.user_id != join.user_id {
                        return Err(StoreError::Conflict(ConflictKind::PositionTaken));
                    }
                }

                let row = match own {
                    Some(invited) => diesel::update(snap_participants::table.find(invited.id))
                        .set((
                            snap_participants::position_id.eq(join.position_id),
                            snap_participants::position_name.eq(join.position_name.clone()),
                            snap_participants::is_joined.eq(true),
                            snap_participants::joined_at.eq(Some(join.joined_at)),
                        ))
                        .returning(InstanceParticipant::as_returning())
                        .get_result(conn)
                        .await?,
                    None => {
                        let new_row = NewInstanceParticipant {
                            id: Uuid::new_v4(),
                            instance_id: join.instance_id,
                            user_id: join.user_id,
                            position_id: join.position_id,
                            position_name: join.position_name.clone(),
                            is_owner: false,
                            is_joined: true,
                            joined_at: Some(join.joined_at),
                        };
                        diesel::insert_into(snap_participants::table)
                            .values(&new_row)
                            .returning(InstanceParticipant::as_returning())
                            .get_result(conn)
                            .await
                            .map_err(|e| conflict_on_unique(e, ConflictKind::PositionTaken))?
                    }
                };
                Ok(row)
            }
            .scope_boxed()
        })
        .await
    }

    async fn start_timer(&self, instance_id: Uuid, at: DateTime<Utc>) -> Result<SnapInstance, StoreError> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<_, StoreError, _>(move |conn| {
            async move {
                lock_in_state(instance_id, InstanceState::Open, conn).await?;
                Ok(diesel::update(snap_instances::table.find(instance_id))
                    .set((
                        snap_instances::state.eq(InstanceState::TimerRunning),
                        snap_instances::timer_start_at.eq(Some(at)),
                    ))
                    .returning(SnapInstance::as_returning())
                    .get_result(conn)
                    .await?)
            }
            .scope_boxed()
        })
        .await
    }

    async fn stamp_capture(&self, stamp: CaptureStamp) -> Result<InstanceParticipant, StoreError> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<_, StoreError, _>(move |conn| {
            async move {
                lock_in_state(stamp.instance_id, InstanceState::TimerRunning, conn).await?;

                let stamped = diesel::update(
                    snap_participants::table
                        .filter(snap_participants::instance_id.eq(stamp.instance_id))
                        .filter(snap_participants::user_id.eq(stamp.user_id))
                        .filter(snap_participants::captured_at.is_null()),
                )
                .set((
                    snap_participants::image_ref.eq(Some(stamp.image_ref.clone())),
                    snap_participants::compositing_id.eq(Some(stamp.compositing_id.clone())),
                    snap_participants::captured_at.eq(Some(stamp.captured_at)),
                ))
                .returning(InstanceParticipant::as_returning())
                .get_result(conn)
                .await
                .optional()?;

                match stamped {
                    Some(row) => Ok(row),
                    None => match InstanceParticipant::find(stamp.instance_id, stamp.user_id, conn).await? {
                        Some(_) => Err(StoreError::Conflict(ConflictKind::AlreadyCaptured)),
                        None => Err(StoreError::NotFound),
                    },
                }
            }
            .scope_boxed()
        })
        .await
    }

    async fn claim_assembly(&self, instance_id: Uuid, required: usize) -> Result<AssemblyClaim, StoreError> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<_, StoreError, _>(move |conn| {
            async move {
                let instance = SnapInstance::lock(instance_id, conn)
                    .await?
                    .ok_or(StoreError::NotFound)?;
                let count = SnapInstance::captured_count(instance_id, conn).await?;
                let captured = usize::try_from(count).unwrap_or_default();

                let all_captured = captured >= required;
                let claimed = all_captured
                    && !instance.assembly_claimed
                    && instance.state == InstanceState::TimerRunning;
                if claimed {
                    diesel::update(snap_instances::table.find(instance_id))
                        .set(snap_instances::assembly_claimed.eq(true))
                        .execute(conn)
                        .await?;
                }

                Ok(AssemblyClaim {
                    captured,
                    all_captured,
                    claimed,
                })
            }
            .scope_boxed()
        })
        .await
    }

    async fn complete_instance(
        &self,
        instance_id: Uuid,
        collage: &CollageRef,
    ) -> Result<SnapInstance, StoreError> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let collage = collage.clone();

        conn.transaction::<_, StoreError, _>(move |conn| {
            async move {
                lock_in_state(instance_id, InstanceState::TimerRunning, conn).await?;
                Ok(diesel::update(snap_instances::table.find(instance_id))
                    .set((
                        snap_instances::state.eq(InstanceState::Complete),
                        snap_instances::collage_id.eq(Some(collage.id)),
                        snap_instances::collage_url.eq(Some(collage.url.clone())),
                        snap_instances::collage_completed_at.eq(Some(collage.completed_at)),
                    ))
                    .returning(SnapInstance::as_returning())
                    .get_result(conn)
                    .await?)
            }
            .scope_boxed()
        })
        .await
    }

    async fn fail_instance(&self, instance_id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            snap_instances::table
                .filter(snap_instances::id.eq(instance_id))
                .filter(snap_instances::state.eq(InstanceState::TimerRunning)),
        )
        .set(snap_instances::state.eq(InstanceState::Error))
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }

    async fn find_synced_snap(&self, instance_id: Uuid) -> Result<Option<SyncedSnap>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(SyncedSnap::find_by_instance(instance_id, &mut conn).await?)
    }

    async fn publish(&self, snap: NewSyncedSnap) -> Result<SyncedSnap, StoreError> {
        let mut conn = self.conn().await?;
        diesel::insert_into(synced_snaps::table)
            .values(&snap)
            .returning(SyncedSnap::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(|e| conflict_on_unique(e, ConflictKind::AlreadyPublished))
    }
}
