use std::collections::HashSet;
use std::path::Path;

use crate::models::{GridSpec, Position, Shape, ShapeView};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("could not read shapes file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse shapes file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("shape {shape}: {problem}")]
    Invalid { shape: String, problem: String },
}

/// Shapes available to new instances, keyed by id.
#[derive(Debug, Clone)]
pub struct ShapeCatalog {
    shapes: Vec<Shape>,
}

impl ShapeCatalog {
    pub fn new(mut shapes: Vec<Shape>) -> Result<Self, CatalogError> {
        let mut ids = HashSet::new();
        for shape in &shapes {
            validate_shape(shape)?;
            if !ids.insert(shape.id) {
                return Err(invalid(shape, format!("duplicate shape id {}", shape.id)));
            }
        }
        shapes.sort_by_key(|s| s.id);
        Ok(Self { shapes })
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        Self::new(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Duo, Trio, Quad and Stack layouts on 1080px canvases.
    pub fn builtin() -> Self {
        Self {
            shapes: vec![
                grid_shape(1, "Duo", 1, 2, 1080, 720, &["left", "right"]),
                grid_shape(2, "Trio", 1, 3, 1080, 720, &["left", "center", "right"]),
                grid_shape(
                    3,
                    "Quad",
                    2,
                    2,
                    1080,
                    1080,
                    &["top_left", "top_right", "bottom_left", "bottom_right"],
                ),
                grid_shape(4, "Stack", 2, 1, 720, 1080, &["top", "bottom"]),
            ],
        }
    }

    pub fn get(&self, shape_id: i32) -> Option<&Shape> {
        self.shapes.iter().find(|s| s.id == shape_id)
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn views(&self) -> Vec<ShapeView> {
        self.shapes.iter().map(ShapeView::from).collect()
    }
}

const BUILTIN_SPACING: u32 = 12;

/// Names fill the grid row by row; the first name is the owner's slot.
fn grid_shape(
    id: i32,
    name: &str,
    rows: u32,
    columns: u32,
    canvas_width: u32,
    canvas_height: u32,
    names: &[&str],
) -> Shape {
    let width = (canvas_width - BUILTIN_SPACING * (columns + 1)) / columns;
    let height = (canvas_height - BUILTIN_SPACING * (rows + 1)) / rows;
    let positions = names
        .iter()
        .enumerate()
        .map(|(i, slot)| {
            let i = i as u32;
            Position {
                id: id * 10 + i as i32 + 1,
                shape_id: id,
                name: slot.to_string(),
                is_owner: i == 0,
                width,
                height,
                row: i / columns,
                column: i % columns,
            }
        })
        .collect();
    Shape {
        id,
        name: name.to_string(),
        required_participants: names.len() as u32,
        grid: GridSpec {
            rows,
            columns,
            spacing: BUILTIN_SPACING,
        },
        canvas_width,
        canvas_height,
        icon_url: None,
        icon_selected_url: None,
        positions,
    }
}

fn invalid(shape: &Shape, problem: impl Into<String>) -> CatalogError {
    CatalogError::Invalid {
        shape: shape.name.clone(),
        problem: problem.into(),
    }
}

pub fn validate_shape(shape: &Shape) -> Result<(), CatalogError> {
    let grid = &shape.grid;
    if grid.rows == 0 || grid.columns == 0 {
        return Err(invalid(shape, "grid needs at least one row and column"));
    }
    if shape.canvas_width == 0 || shape.canvas_height == 0 {
        return Err(invalid(shape, "canvas must have positive dimensions"));
    }
    if shape.positions.len() != shape.required() {
        return Err(invalid(
            shape,
            format!(
                "{} positions for {} required participants",
                shape.positions.len(),
                shape.required_participants
            ),
        ));
    }
    if shape.positions.iter().filter(|p| p.is_owner).count() != 1 {
        return Err(invalid(shape, "exactly one position must belong to the owner"));
    }

    let mut names = HashSet::new();
    let mut ids = HashSet::new();
    let mut cells = HashSet::new();
    for position in &shape.positions {
        if position.shape_id != shape.id {
            return Err(invalid(shape, format!("position {} belongs to another shape", position.name)));
        }
        if position.width == 0 || position.height == 0 {
            return Err(invalid(shape, format!("position {} has no size", position.name)));
        }
        if position.row >= grid.rows || position.column >= grid.columns {
            return Err(invalid(shape, format!("position {} is outside the grid", position.name)));
        }
        if !names.insert(position.name.as_str()) {
            return Err(invalid(shape, format!("duplicate position name {}", position.name)));
        }
        if !ids.insert(position.id) {
            return Err(invalid(shape, format!("duplicate position id {}", position.id)));
        }
        if !cells.insert((position.row, position.column)) {
            return Err(invalid(shape, format!("position {} shares a grid cell", position.name)));
        }
    }
    Ok(())
}
