use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::models::{
    CaptureOutcome, CreateInstanceView, InstanceView, JoinInstanceView, ParticipantView, ShapeView,
    SyncedSnap,
};
use crate::snaps::{SnapError, SnapService};

/// Success body: `{"message": "ok", ...payload}`.
#[derive(Debug, Serialize)]
pub struct Acknowledged<T> {
    message: &'static str,
    #[serde(flatten)]
    payload: T,
}

fn ok<T>(payload: T) -> Json<Acknowledged<T>> {
    Json(Acknowledged {
        message: "ok",
        payload,
    })
}

#[derive(Debug, Serialize)]
pub struct ShapesPayload {
    shapes: Vec<ShapeView>,
}

#[derive(Debug, Serialize)]
pub struct InstancePayload {
    instance: InstanceView,
}

#[derive(Debug, Serialize)]
pub struct ParticipantPayload {
    participant: ParticipantView,
}

#[derive(Debug, Serialize)]
pub struct PublishPayload {
    snap: SyncedSnap,
}

pub async fn list_shapes(State(snaps): State<Arc<SnapService>>) -> Json<Acknowledged<ShapesPayload>> {
    ok(ShapesPayload {
        shapes: snaps.catalog().views(),
    })
}

pub async fn create_instance(
    State(snaps): State<Arc<SnapService>>,
    user: AuthUser,
    Json(request): Json<CreateInstanceView>,
) -> Result<Json<Acknowledged<InstancePayload>>, SnapError> {
    let instance = snaps.create_instance(user.id(), request).await?;
    let view = snaps.instance_view(&instance.instance_key, user.id()).await?;
    Ok(ok(InstancePayload { instance: view }))
}

pub async fn get_instance(
    State(snaps): State<Arc<SnapService>>,
    user: AuthUser,
    Path(key): Path<String>,
) -> Result<Json<Acknowledged<InstancePayload>>, SnapError> {
    let instance = snaps.instance_view(&key, user.id()).await?;
    Ok(ok(InstancePayload { instance }))
}

pub async fn check_eligibility(
    State(snaps): State<Arc<SnapService>>,
    user: AuthUser,
    Path(key): Path<String>,
) -> Result<Json<Acknowledged<ParticipantPayload>>, SnapError> {
    let participant = snaps.check_join_eligibility(&key, user.id()).await?;
    Ok(ok(ParticipantPayload {
        participant: participant.into(),
    }))
}

pub async fn join(
    State(snaps): State<Arc<SnapService>>,
    user: AuthUser,
    Path(key): Path<String>,
    Json(request): Json<JoinInstanceView>,
) -> Result<Json<Acknowledged<ParticipantPayload>>, SnapError> {
    let participant = snaps.join(&key, user.id(), &request.position).await?;
    Ok(ok(ParticipantPayload {
        participant: participant.into(),
    }))
}

pub async fn start_timer(
    State(snaps): State<Arc<SnapService>>,
    user: AuthUser,
    Path(key): Path<String>,
) -> Result<Json<Acknowledged<InstancePayload>>, SnapError> {
    snaps.start_timer_as(&key, user.id()).await?;
    let instance = snaps.instance_view(&key, user.id()).await?;
    Ok(ok(InstancePayload { instance }))
}

/// Multipart upload with the image in the `image` field.
pub async fn take_snap(
    State(snaps): State<Arc<SnapService>>,
    user: AuthUser,
    Path(key): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Acknowledged<CaptureOutcome>>, SnapError> {
    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| SnapError::BadRequest(e.body_text()))?
    {
        if field.name() == Some("image") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| SnapError::BadRequest(e.body_text()))?;
            image = Some(bytes);
            break;
        }
    }
    let image = image.ok_or_else(|| SnapError::BadRequest("missing image field".into()))?;

    let outcome = snaps.take_snap(user.id(), &key, &image).await?;
    Ok(ok(outcome))
}

pub async fn publish(
    State(snaps): State<Arc<SnapService>>,
    user: AuthUser,
    Path(key): Path<String>,
) -> Result<Json<Acknowledged<PublishPayload>>, SnapError> {
    let snap = snaps.publish(&key, user.id()).await?;
    Ok(ok(PublishPayload { snap }))
}
