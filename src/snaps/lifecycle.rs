use std::collections::HashSet;

use uuid::Uuid;

use super::error::{ForbiddenReason, SnapError};
use super::SnapService;
use crate::database::{ConflictKind, ParticipantJoin, StoreError};
use crate::models::{
    AssemblyClaim, CreateInstanceView, InstanceParticipant, InstanceState, InstanceView,
    NewInstanceParticipant, NewSnapInstance, ParticipantView, Shape, SnapInstance, UserView,
};

const KEY_LEN: usize = 10;
const KEY_ATTEMPTS: usize = 3;

fn generate_instance_key() -> String {
    Uuid::new_v4().simple().to_string()[..KEY_LEN].to_ascii_uppercase()
}

/// Rejection for an operation that needs `expected` but found `actual`.
fn wrong_state(expected: InstanceState, actual: InstanceState) -> SnapError {
    StoreError::StaleState { expected, actual }.into()
}

impl SnapService {
    pub async fn instance_by_key(&self, key: &str) -> Result<SnapInstance, SnapError> {
        self.store
            .find_instance_by_key(key)
            .await?
            .ok_or(SnapError::NotFound("instance"))
    }

    pub(crate) fn shape_for(&self, instance: &SnapInstance) -> Result<&Shape, SnapError> {
        self.catalog
            .get(instance.shape_id)
            .ok_or(SnapError::NotFound("shape"))
    }

    async fn require_user(&self, user_id: i32) -> Result<(), SnapError> {
        match self.store.find_user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(SnapError::NotFound("user")),
        }
    }

    /// Opens a new instance owned by `owner_id`. The owner is seated on the
    /// shape's owner slot and already joined; every invitee gets an unjoined
    /// row on the position they were invited to.
    pub async fn create_instance(
        &self,
        owner_id: i32,
        request: CreateInstanceView,
    ) -> Result<SnapInstance, SnapError> {
        let shape = self
            .catalog
            .get(request.shape_id)
            .ok_or(SnapError::NotFound("shape"))?;
        let countdown_secs = request
            .countdown_secs
            .unwrap_or(self.settings.default_countdown_secs);
        if countdown_secs < 0 {
            return Err(SnapError::BadRequest("countdown must not be negative".into()));
        }

        self.require_user(owner_id).await?;
        let owner_position = shape
            .owner_position()
            .ok_or_else(|| SnapError::Internal(format!("shape {} has no owner slot", shape.id)))?;

        let mut users = HashSet::from([owner_id]);
        let mut positions = HashSet::from([owner_position.id]);
        let mut invited = Vec::with_capacity(request.invites.len());
        for invite in &request.invites {
            let position = shape
                .position_by_name(&invite.position)
                .ok_or(SnapError::NotFound("position"))?;
            if !users.insert(invite.user_id) {
                return Err(SnapError::BadRequest(format!(
                    "user {} is invited more than once",
                    invite.user_id
                )));
            }
            if !positions.insert(position.id) {
                return Err(SnapError::Forbidden(ForbiddenReason::PositionTaken));
            }
            self.require_user(invite.user_id).await?;
            invited.push((invite.user_id, position));
        }

        let now = self.clock.now();
        for _ in 0..KEY_ATTEMPTS {
            let id = Uuid::new_v4();
            let instance = NewSnapInstance {
                id,
                instance_key: generate_instance_key(),
                created_by: owner_id,
                shape_id: shape.id,
                state: InstanceState::Open,
                countdown_secs,
                created_at: now,
            };
            let mut rows = vec![NewInstanceParticipant {
                id: Uuid::new_v4(),
                instance_id: id,
                user_id: owner_id,
                position_id: owner_position.id,
                position_name: owner_position.name.clone(),
                is_owner: true,
                is_joined: true,
                joined_at: Some(now),
            }];
            rows.extend(invited.iter().map(|(user_id, position)| NewInstanceParticipant {
                id: Uuid::new_v4(),
                instance_id: id,
                user_id: *user_id,
                position_id: position.id,
                position_name: position.name.clone(),
                is_owner: false,
                is_joined: false,
                joined_at: None,
            }));

            match self.store.create_instance(instance, rows).await {
                Ok(created) => {
                    log::info!(
                        "instance {} opened by user {} with shape {}",
                        created.instance_key,
                        owner_id,
                        shape.name
                    );
                    return Ok(created);
                }
                Err(StoreError::Conflict(ConflictKind::DuplicateKey)) => {
                    log::warn!("instance key collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(SnapError::Internal("could not allocate an instance key".into()))
    }

    /// Seats `user_id` on the named position of an open instance.
    pub async fn join(
        &self,
        key: &str,
        user_id: i32,
        position_name: &str,
    ) -> Result<InstanceParticipant, SnapError> {
        let instance = self.instance_by_key(key).await?;
        let shape = self.shape_for(&instance)?;
        let position = shape
            .position_by_name(position_name)
            .ok_or(SnapError::NotFound("position"))?;
        if instance.state != InstanceState::Open {
            return Err(wrong_state(InstanceState::Open, instance.state));
        }
        self.require_user(user_id).await?;

        let joined = self
            .store
            .join_participant(ParticipantJoin {
                instance_id: instance.id,
                user_id,
                position_id: position.id,
                position_name: position.name.clone(),
                joined_at: self.clock.now(),
            })
            .await?;
        log::info!("user {} joined {} as {}", user_id, key, position.name);
        Ok(joined)
    }

    /// Gate run before a client enters the session UI.
    pub async fn check_join_eligibility(
        &self,
        key: &str,
        user_id: i32,
    ) -> Result<InstanceParticipant, SnapError> {
        let instance = self.instance_by_key(key).await?;
        let participant = self
            .store
            .find_participant(instance.id, user_id)
            .await?
            .ok_or(SnapError::NotFound("participant"))?;
        if participant.has_captured() {
            return Err(SnapError::Forbidden(ForbiddenReason::AlreadyCaptured));
        }
        if participant.is_joined {
            return Err(SnapError::Forbidden(ForbiddenReason::AlreadyJoined));
        }
        Ok(participant)
    }

    /// `Open -> TimerRunning`. A running timer is never restarted.
    pub async fn start_timer(&self, instance_id: Uuid) -> Result<SnapInstance, SnapError> {
        let instance = self
            .store
            .find_instance(instance_id)
            .await?
            .ok_or(SnapError::NotFound("instance"))?;
        if let Err(e) = instance.state.transition(InstanceState::TimerRunning) {
            return Err(wrong_state(InstanceState::Open, e.from));
        }
        let started = self.store.start_timer(instance_id, self.clock.now()).await?;
        log::info!(
            "countdown of {}s started for {}",
            started.countdown_secs,
            started.instance_key
        );
        Ok(started)
    }

    /// Owner-facing entry point for `start_timer`.
    pub async fn start_timer_as(&self, key: &str, user_id: i32) -> Result<SnapInstance, SnapError> {
        let instance = self.instance_by_key(key).await?;
        if instance.created_by != user_id {
            return Err(SnapError::Forbidden(ForbiddenReason::NotOwner));
        }
        self.start_timer(instance.id).await
    }

    /// Re-counts captures after a stamp. `claimed` is true for exactly one
    /// caller per instance, the one that must assemble the collage.
    pub async fn try_advance_to_complete(
        &self,
        instance_id: Uuid,
        shape: &Shape,
    ) -> Result<AssemblyClaim, SnapError> {
        let claim = self.store.claim_assembly(instance_id, shape.required()).await?;
        log::debug!(
            "instance {} has {}/{} captures",
            instance_id,
            claim.captured,
            shape.required()
        );
        Ok(claim)
    }

    /// Instance with its participants, for polling clients.
    pub async fn instance_view(&self, key: &str, user_id: i32) -> Result<InstanceView, SnapError> {
        let instance = self.instance_by_key(key).await?;
        let participants = self.store.participants(instance.id).await?;
        if instance.created_by != user_id && !participants.iter().any(|p| p.user_id == user_id) {
            return Err(SnapError::NotFound("instance"));
        }

        let mut views = Vec::with_capacity(participants.len());
        for participant in participants {
            let user = self.store.find_user(participant.user_id).await?;
            let mut view = ParticipantView::from(participant);
            view.user = user.map(UserView::from);
            views.push(view);
        }
        Ok(InstanceView::new(instance, views))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_keys_are_short_uppercase_hex() {
        let key = generate_instance_key();
        assert_eq!(key.len(), KEY_LEN);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(key, generate_instance_key());
    }
}
