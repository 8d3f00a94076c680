use uuid::Uuid;

use super::error::{ForbiddenReason, SnapError};
use super::SnapService;
use crate::database::CaptureStamp;
use crate::media::{fit_to_position, MediaError};
use crate::models::{CaptureOutcome, InstanceState, SnapInstance};
use crate::realtime::{RelayError, SnapEvent};

/// Result of one capture, plus whether this call assembled the collage.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureReport {
    pub outcome: CaptureOutcome,
    pub assembled: bool,
}

impl SnapService {
    /// Accepts one participant's image for an instance whose countdown has
    /// elapsed. Storage and compositing failures move the instance to
    /// `Error` and come back as `AbortRequired`.
    pub async fn capture(
        &self,
        user_id: i32,
        instance_id: Uuid,
        image: &[u8],
    ) -> Result<CaptureReport, SnapError> {
        let instance = self
            .store
            .find_instance(instance_id)
            .await?
            .ok_or(SnapError::NotFound("instance"))?;
        let participant = self
            .store
            .find_participant(instance_id, user_id)
            .await?
            .ok_or(SnapError::NotFound("participant"))?;
        if participant.has_captured() {
            return Err(SnapError::Forbidden(ForbiddenReason::AlreadyCaptured));
        }
        if !participant.is_joined {
            return Err(SnapError::Forbidden(ForbiddenReason::NotJoined));
        }

        let now = self.clock.now();
        let deadline = instance
            .capture_deadline()
            .ok_or(SnapError::Forbidden(ForbiddenReason::TimerNotStarted))?;
        if now < deadline {
            return Err(SnapError::Forbidden(ForbiddenReason::DeadlineNotReached));
        }
        if instance.state != InstanceState::TimerRunning {
            return Err(SnapError::Forbidden(ForbiddenReason::InstanceClosed));
        }

        let shape = self.shape_for(&instance)?;
        let position = shape
            .position(participant.position_id)
            .ok_or(SnapError::NotFound("position"))?;

        let prepared = fit_to_position(image, position).map_err(|e| match e {
            MediaError::UnsupportedFormat | MediaError::Decode(_) => SnapError::BadRequest(e.to_string()),
            other => SnapError::Internal(other.to_string()),
        })?;

        // unique per attempt so a racing duplicate cannot overwrite the stored winner
        let attempt = format!(
            "{}_{}_{}_{}",
            position.name,
            user_id,
            now.timestamp_millis(),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let storage_key = format!("{}/{}.{}", instance.id, attempt, prepared.extension());
        let image_ref = match self
            .storage
            .put(
                &self.settings.bucket,
                &storage_key,
                prepared.bytes.clone(),
                prepared.content_type(),
            )
            .await
        {
            Ok(url) => url,
            Err(e) => return Err(self.abort(&instance, e.to_string()).await),
        };

        let folder = instance.id.to_string();
        let compositing_id = match self.compositor.upload(prepared.bytes, &folder, &attempt).await {
            Ok(asset_id) => asset_id,
            Err(e) => return Err(self.abort(&instance, e.to_string()).await),
        };

        self.store
            .stamp_capture(CaptureStamp {
                instance_id,
                user_id,
                image_ref,
                compositing_id,
                captured_at: now,
            })
            .await?;
        log::info!(
            "user {} captured {} for {}",
            user_id,
            position.name,
            instance.instance_key
        );

        let claim = self.try_advance_to_complete(instance_id, shape).await?;
        if claim.claimed {
            let collage = match self.assemble(&instance, shape).await {
                Ok(collage) => collage,
                Err(e) => return Err(self.abort(&instance, e.to_string()).await),
            };
            return Ok(CaptureReport {
                outcome: CaptureOutcome {
                    all_captured: true,
                    collage_image_url: Some(collage.url),
                },
                assembled: true,
            });
        }

        // another capture is assembling; report whatever it attached so far
        let collage_image_url = if claim.all_captured {
            self.store
                .find_instance(instance_id)
                .await?
                .and_then(|i| i.collage_url)
        } else {
            None
        };
        Ok(CaptureReport {
            outcome: CaptureOutcome {
                all_captured: claim.all_captured,
                collage_image_url,
            },
            assembled: false,
        })
    }

    /// Moves the instance to `Error` and returns the abort to surface.
    pub(crate) async fn abort(&self, instance: &SnapInstance, reason: String) -> SnapError {
        log::error!("aborting {}: {}", instance.instance_key, reason);
        match self.store.fail_instance(instance.id).await {
            Ok(true) => {}
            Ok(false) => log::warn!("{} was no longer running when aborted", instance.instance_key),
            Err(e) => log::error!("could not mark {} as failed: {}", instance.instance_key, e),
        }
        self.compositor.discard(&instance.id.to_string()).await;
        SnapError::AbortRequired(reason)
    }

    /// Capture addressed by instance key, with the realtime fan-out the
    /// outcome calls for.
    pub async fn take_snap(
        &self,
        user_id: i32,
        key: &str,
        image: &[u8],
    ) -> Result<CaptureOutcome, SnapError> {
        let instance = self.instance_by_key(key).await?;
        let report = match self.capture(user_id, instance.id, image).await {
            Ok(report) => report,
            Err(e) => {
                if e.is_abort() {
                    self.announce_abort(key).await;
                }
                return Err(e);
            }
        };

        if report.assembled {
            self.announce_collage(key).await?;
        }
        Ok(report.outcome)
    }

    /// Sends SEND_SNAP and waits for the relay's ack. A relay that is not
    /// ready is skipped; a connected relay that rejects or never answers
    /// fails the request.
    async fn announce_collage(&self, key: &str) -> Result<(), SnapError> {
        if !self.broadcaster.is_ready() {
            log::warn!("relay not ready, skipping {} for {}", SnapEvent::SendSnap.as_str(), key);
            return Ok(());
        }
        match self.broadcaster.broadcast_with_ack(SnapEvent::SendSnap, key).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                log::error!("relay rejected {} for {}", SnapEvent::SendSnap.as_str(), key);
                self.announce_abort(key).await;
                Err(SnapError::RelayRejected)
            }
            Err(RelayError::NotConnected | RelayError::NotAuthenticated) => {
                log::warn!("relay went away, skipping {} for {}", SnapEvent::SendSnap.as_str(), key);
                Ok(())
            }
            Err(e) => {
                log::error!("{} for {} failed: {}", SnapEvent::SendSnap.as_str(), key, e);
                self.announce_abort(key).await;
                Err(SnapError::RelayRejected)
            }
        }
    }

    pub(crate) async fn announce_abort(&self, key: &str) {
        self.announce(SnapEvent::ErrorSnap, key).await;
    }

    /// Fire-and-forget broadcast, skipped while the relay is not ready.
    pub(crate) async fn announce(&self, event: SnapEvent, key: &str) {
        if !self.broadcaster.is_ready() {
            log::warn!("relay not ready, skipping {} for {}", event.as_str(), key);
            return;
        }
        if let Err(e) = self.broadcaster.broadcast(event, key).await {
            log::warn!("{} for {} was not sent: {}", event.as_str(), key, e);
        }
    }
}
