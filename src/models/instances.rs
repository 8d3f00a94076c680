use std::fmt;
use std::io::Write;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::users::UserView;
use crate::schema::*;

/// Lifecycle of a snap instance.
///
/// `Open -> TimerRunning -> Complete`, with `TimerRunning -> Error` as the
/// only abnormal exit. `Complete` and `Error` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Open,
    TimerRunning,
    Complete,
    Error,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Open => "open",
            InstanceState::TimerRunning => "timer_running",
            InstanceState::Complete => "complete",
            InstanceState::Error => "error",
        }
    }

    pub fn can_transition_to(&self, next: InstanceState) -> bool {
        matches!(
            (self, next),
            (InstanceState::Open, InstanceState::TimerRunning)
                | (InstanceState::TimerRunning, InstanceState::Complete)
                | (InstanceState::TimerRunning, InstanceState::Error)
        )
    }

    /// Validates a move, returning the new state.
    pub fn transition(self, next: InstanceState) -> Result<InstanceState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(InstanceState::Open),
            "timer_running" => Ok(InstanceState::TimerRunning),
            "complete" => Ok(InstanceState::Complete),
            "error" => Ok(InstanceState::Error),
            other => Err(format!("unknown instance state '{other}'")),
        }
    }
}

impl ToSql<Text, Pg> for InstanceState {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for InstanceState {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let raw = std::str::from_utf8(bytes.as_bytes())?;
        raw.parse().map_err(Into::into)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal instance transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: InstanceState,
    pub to: InstanceState,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable)]
#[diesel(table_name = snap_instances)]
pub struct SnapInstance {
    pub id: Uuid,
    pub instance_key: String,
    pub created_by: i32,
    pub shape_id: i32,
    pub state: InstanceState,
    pub timer_start_at: Option<DateTime<Utc>>,
    pub countdown_secs: i32,
    pub assembly_claimed: bool,
    pub collage_id: Option<Uuid>,
    pub collage_url: Option<String>,
    pub collage_completed_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = snap_instances)]
pub struct NewSnapInstance {
    pub id: Uuid,
    pub instance_key: String,
    pub created_by: i32,
    pub shape_id: i32,
    pub state: InstanceState,
    pub countdown_secs: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable)]
#[diesel(table_name = snap_participants)]
pub struct InstanceParticipant {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub user_id: i32,
    pub position_id: i32,
    pub position_name: String,
    pub is_owner: bool,
    pub is_joined: bool,
    pub joined_at: Option<DateTime<Utc>>,
    pub image_ref: Option<String>,
    pub compositing_id: Option<String>,
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = snap_participants)]
pub struct NewInstanceParticipant {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub user_id: i32,
    pub position_id: i32,
    pub position_name: String,
    pub is_owner: bool,
    pub is_joined: bool,
    pub joined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable)]
#[diesel(table_name = synced_snaps)]
pub struct SyncedSnap {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub owner_id: i32,
    pub shape_id: i32,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = synced_snaps)]
pub struct NewSyncedSnap {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub owner_id: i32,
    pub shape_id: i32,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
}

/// Reference to an assembled collage, attached to its instance once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollageRef {
    pub id: Uuid,
    pub url: String,
    pub completed_at: DateTime<Utc>,
}

/// Outcome of re-counting captures after a participant's stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyClaim {
    pub captured: usize,
    pub all_captured: bool,
    /// True for exactly one caller per instance: the one that must assemble.
    pub claimed: bool,
}

impl SnapInstance {
    /// Earliest moment a capture is accepted.
    pub fn capture_deadline(&self) -> Option<DateTime<Utc>> {
        self.timer_start_at
            .map(|start| start + Duration::seconds(i64::from(self.countdown_secs)))
    }

    pub fn collage(&self) -> Option<CollageRef> {
        match (self.collage_id, &self.collage_url, self.collage_completed_at) {
            (Some(id), Some(url), Some(completed_at)) => Some(CollageRef {
                id,
                url: url.clone(),
                completed_at,
            }),
            _ => None,
        }
    }

    pub async fn find(id: Uuid, conn: &mut AsyncPgConnection) -> QueryResult<Option<SnapInstance>> {
        snap_instances::table
            .find(id)
            .filter(snap_instances::is_deleted.eq(false))
            .select(SnapInstance::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn find_by_key(key: &str, conn: &mut AsyncPgConnection) -> QueryResult<Option<SnapInstance>> {
        snap_instances::table
            .filter(snap_instances::instance_key.eq(key))
            .filter(snap_instances::is_deleted.eq(false))
            .select(SnapInstance::as_select())
            .first(conn)
            .await
            .optional()
    }

    /// Row-locks the instance for the rest of the enclosing transaction.
    pub async fn lock(id: Uuid, conn: &mut AsyncPgConnection) -> QueryResult<Option<SnapInstance>> {
        snap_instances::table
            .find(id)
            .filter(snap_instances::is_deleted.eq(false))
            .select(SnapInstance::as_select())
            .for_update()
            .first(conn)
            .await
            .optional()
    }

    pub async fn captured_count(id: Uuid, conn: &mut AsyncPgConnection) -> QueryResult<i64> {
        snap_participants::table
            .filter(snap_participants::instance_id.eq(id))
            .filter(snap_participants::captured_at.is_not_null())
            .count()
            .get_result(conn)
            .await
    }
}

impl InstanceParticipant {
    pub fn has_captured(&self) -> bool {
        self.captured_at.is_some()
    }

    pub async fn find(
        instance_id: Uuid,
        user_id: i32,
        conn: &mut AsyncPgConnection,
    ) -> QueryResult<Option<InstanceParticipant>> {
        snap_participants::table
            .filter(snap_participants::instance_id.eq(instance_id))
            .filter(snap_participants::user_id.eq(user_id))
            .select(InstanceParticipant::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn holder_of(
        instance_id: Uuid,
        position_id: i32,
        conn: &mut AsyncPgConnection,
    ) -> QueryResult<Option<InstanceParticipant>> {
        snap_participants::table
            .filter(snap_participants::instance_id.eq(instance_id))
            .filter(snap_participants::position_id.eq(position_id))
            .select(InstanceParticipant::as_select())
            .first(conn)
            .await
            .optional()
    }
}

impl SyncedSnap {
    pub async fn find_by_instance(
        instance_id: Uuid,
        conn: &mut AsyncPgConnection,
    ) -> QueryResult<Option<SyncedSnap>> {
        synced_snaps::table
            .filter(synced_snaps::instance_id.eq(instance_id))
            .select(SyncedSnap::as_select())
            .first(conn)
            .await
            .optional()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CreateInstanceView {
    pub shape_id: i32,
    pub countdown_secs: Option<i32>,
    #[serde(default)]
    pub invites: Vec<InviteView>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InviteView {
    pub user_id: i32,
    pub position: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JoinInstanceView {
    pub position: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ParticipantView {
    pub user_id: i32,
    pub position: String,
    pub is_owner: bool,
    pub is_joined: bool,
    pub has_captured: bool,
    pub user: Option<UserView>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InstanceView {
    pub id: Uuid,
    pub key: String,
    pub shape_id: i32,
    pub created_by: i32,
    pub state: InstanceState,
    pub timer_start_at: Option<DateTime<Utc>>,
    pub countdown_secs: i32,
    pub collage_url: Option<String>,
    pub participants: Vec<ParticipantView>,
}

/// Body of a successful take_snap.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureOutcome {
    pub all_captured: bool,
    pub collage_image_url: Option<String>,
}

impl From<InstanceParticipant> for ParticipantView {
    fn from(participant: InstanceParticipant) -> Self {
        ParticipantView {
            user_id: participant.user_id,
            has_captured: participant.has_captured(),
            position: participant.position_name,
            is_owner: participant.is_owner,
            is_joined: participant.is_joined,
            user: None, // filled in by the caller when it has the user row
        }
    }
}

impl InstanceView {
    pub fn new(instance: SnapInstance, participants: Vec<ParticipantView>) -> Self {
        InstanceView {
            id: instance.id,
            key: instance.instance_key,
            shape_id: instance.shape_id,
            created_by: instance.created_by,
            state: instance.state,
            timer_start_at: instance.timer_start_at,
            countdown_secs: instance.countdown_secs,
            collage_url: instance.collage_url,
            participants,
        }
    }
}
