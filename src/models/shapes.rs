use serde::{Deserialize, Serialize};

/// One named slot of a shape. `row`/`column` place the slot's image in the
/// collage grid; `width`/`height` are the pixel size captured images are
/// resized to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Position {
    pub id: i32,
    pub shape_id: i32,
    pub name: String,
    #[serde(default)]
    pub is_owner: bool,
    pub width: u32,
    pub height: u32,
    pub row: u32,
    pub column: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GridSpec {
    pub rows: u32,
    pub columns: u32,
    #[serde(default)]
    pub spacing: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Shape {
    pub id: i32,
    pub name: String,
    pub required_participants: u32,
    pub grid: GridSpec,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub icon_url: Option<String>,
    pub icon_selected_url: Option<String>,
    pub positions: Vec<Position>,
}

impl Shape {
    pub fn owner_position(&self) -> Option<&Position> {
        self.positions.iter().find(|p| p.is_owner)
    }

    pub fn position_by_name(&self, name: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.name == name)
    }

    pub fn position(&self, position_id: i32) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == position_id)
    }

    pub fn required(&self) -> usize {
        self.required_participants as usize
    }
}

/// Public listing of a shape, as served by `GET /snaps/shapes`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ShapeView {
    pub id: i32,
    pub name: String,
    pub required_participants: u32,
    pub rows: u32,
    pub columns: u32,
    pub icon_url: Option<String>,
    pub icon_selected_url: Option<String>,
    pub positions: Vec<PositionView>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PositionView {
    pub name: String,
    pub is_owner: bool,
    pub row: u32,
    pub column: u32,
}

impl From<&Shape> for ShapeView {
    fn from(shape: &Shape) -> Self {
        ShapeView {
            id: shape.id,
            name: shape.name.clone(),
            required_participants: shape.required_participants,
            rows: shape.grid.rows,
            columns: shape.grid.columns,
            icon_url: shape.icon_url.clone(),
            icon_selected_url: shape.icon_selected_url.clone(),
            positions: shape
                .positions
                .iter()
                .map(|p| PositionView {
                    name: p.name.clone(),
                    is_owner: p.is_owner,
                    row: p.row,
                    column: p.column,
                })
                .collect(),
        }
    }
}
