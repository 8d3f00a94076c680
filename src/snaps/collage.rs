use uuid::Uuid;

use super::error::SnapError;
use super::SnapService;
use crate::media::{CollageCell, CollageRequest};
use crate::models::{CollageRef, InstanceParticipant, Shape, SnapInstance};

/// Lays every captured participant out on the cell of its position.
/// Fails unless each of the shape's positions has exactly one capture.
pub fn build_collage_request(
    shape: &Shape,
    participants: &[InstanceParticipant],
    collage_id: Uuid,
) -> Result<CollageRequest, SnapError> {
    let mut cells = Vec::with_capacity(shape.required());
    for participant in participants.iter().filter(|p| p.has_captured()) {
        let position = shape.position(participant.position_id).ok_or_else(|| {
            SnapError::Internal(format!("position {} is not part of {}", participant.position_id, shape.name))
        })?;
        let asset_id = participant.compositing_id.clone().ok_or_else(|| {
            SnapError::Internal(format!("capture for {} has no compositing asset", position.name))
        })?;
        cells.push(CollageCell {
            asset_id,
            row: position.row,
            column: position.column,
        });
    }
    if cells.len() != shape.required() {
        return Err(SnapError::Internal(format!(
            "{} of {} captures present",
            cells.len(),
            shape.required()
        )));
    }
    cells.sort_by_key(|c| (c.row, c.column));

    Ok(CollageRequest {
        collage_id: collage_id.to_string(),
        canvas_width: shape.canvas_width,
        canvas_height: shape.canvas_height,
        rows: shape.grid.rows,
        columns: shape.grid.columns,
        spacing: shape.grid.spacing,
        cells,
    })
}

impl SnapService {
    /// Renders the collage and attaches it, completing the instance. Only
    /// the holder of the assembly claim calls this.
    pub(crate) async fn assemble(
        &self,
        instance: &SnapInstance,
        shape: &Shape,
    ) -> Result<CollageRef, SnapError> {
        let participants = self.store.participants(instance.id).await?;
        let collage_id = Uuid::new_v4();
        let request = build_collage_request(shape, &participants, collage_id)?;

        let url = self
            .compositor
            .create_collage(&request)
            .await
            .map_err(|e| SnapError::Internal(e.to_string()))?;
        let collage = CollageRef {
            id: collage_id,
            url,
            completed_at: self.clock.now(),
        };
        self.store.complete_instance(instance.id, &collage).await?;
        log::info!("collage {} assembled for {}", collage.id, instance.instance_key);
        Ok(collage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snaps::ShapeCatalog;
    use chrono::Utc;

    fn captured(shape: &Shape, name: &str, user_id: i32) -> InstanceParticipant {
        let position = shape.position_by_name(name).unwrap();
        InstanceParticipant {
            id: Uuid::new_v4(),
            instance_id: Uuid::nil(),
            user_id,
            position_id: position.id,
            position_name: name.to_string(),
            is_owner: position.is_owner,
            is_joined: true,
            joined_at: Some(Utc::now()),
            image_ref: Some(format!("memory://snaps/{name}.png")),
            compositing_id: Some(format!("asset-{name}")),
            captured_at: Some(Utc::now()),
        }
    }

    #[test]
    fn cells_follow_grid_placement_not_list_order() {
        let catalog = ShapeCatalog::builtin();
        let quad = catalog.get(3).unwrap();
        let participants = vec![
            captured(quad, "bottom_right", 4),
            captured(quad, "top_right", 2),
            captured(quad, "bottom_left", 3),
            captured(quad, "top_left", 1),
        ];

        let request = build_collage_request(quad, &participants, Uuid::new_v4()).unwrap();
        let order: Vec<_> = request.cells.iter().map(|c| c.asset_id.as_str()).collect();
        assert_eq!(
            order,
            ["asset-top_left", "asset-top_right", "asset-bottom_left", "asset-bottom_right"]
        );
        assert_eq!(request.cells[2].row, 1);
        assert_eq!(request.cells[2].column, 0);
        assert_eq!((request.canvas_width, request.spacing), (1080, 12));
    }

    #[test]
    fn missing_captures_never_produce_a_request() {
        let catalog = ShapeCatalog::builtin();
        let duo = catalog.get(1).unwrap();
        let mut waiting = captured(duo, "right", 2);
        waiting.captured_at = None;
        let participants = vec![captured(duo, "left", 1), waiting];

        assert!(build_collage_request(duo, &participants, Uuid::new_v4()).is_err());
    }
}
