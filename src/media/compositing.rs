//! Compositing store and collage service.
//!
//! Participant images are uploaded under a public id once captured; the
//! collage is then requested by listing those asset ids with their grid
//! cells. `HttpCompositor` talks to a remote service over JSON,
//! `LocalCompositor` renders the grid in-process with `image`.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use dashmap::DashMap;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use super::resize::encode;
use super::{MediaError, ObjectStorage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollageCell {
    pub asset_id: String,
    pub row: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollageRequest {
    pub collage_id: String,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub rows: u32,
    pub columns: u32,
    pub spacing: u32,
    pub cells: Vec<CollageCell>,
}

/// Pixel box of one grid cell: spacing surrounds every cell, including the
/// canvas border.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CollageRequest {
    pub fn cell_rect(&self, row: u32, column: u32) -> Option<CellRect> {
        if row >= self.rows || column >= self.columns {
            return None;
        }
        let gaps_x = self.spacing.checked_mul(self.columns + 1)?;
        let gaps_y = self.spacing.checked_mul(self.rows + 1)?;
        let width = self.canvas_width.checked_sub(gaps_x)? / self.columns;
        let height = self.canvas_height.checked_sub(gaps_y)? / self.rows;
        if width == 0 || height == 0 {
            return None;
        }
        Some(CellRect {
            x: self.spacing + column * (width + self.spacing),
            y: self.spacing + row * (height + self.spacing),
            width,
            height,
        })
    }
}

#[async_trait]
pub trait CompositingService: Send + Sync {
    /// Stores `bytes` under `{folder}/{public_id}` and returns the asset id
    /// later referenced by collage cells.
    async fn upload(&self, bytes: Vec<u8>, folder: &str, public_id: &str) -> Result<String, MediaError>;

    /// Renders the collage and returns its URL.
    async fn create_collage(&self, request: &CollageRequest) -> Result<String, MediaError>;

    /// Drops whatever is still held for an abandoned folder.
    async fn discard(&self, _folder: &str) {}
}

#[derive(Serialize)]
struct UploadBody<'a> {
    file: String,
    folder: &'a str,
    public_id: &'a str,
}

#[derive(Deserialize)]
struct UploadReply {
    asset_id: Option<String>,
    public_id: Option<String>,
}

#[derive(Deserialize)]
struct CollageReply {
    url: String,
}

pub struct HttpCompositor {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpCompositor {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response, MediaError> {
        let mut request = self.client.post(format!("{}{}", self.base_url, path)).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| MediaError::Compositing(e.to_string()))?;
        if !response.status().is_success() {
            return Err(MediaError::Compositing(format!(
                "{} returned {}",
                path,
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompositingService for HttpCompositor {
    async fn upload(&self, bytes: Vec<u8>, folder: &str, public_id: &str) -> Result<String, MediaError> {
        let mime = image::guess_format(&bytes)
            .map(|f| f.to_mime_type())
            .unwrap_or("application/octet-stream");
        let body = UploadBody {
            file: format!("data:{};base64,{}", mime, general_purpose::STANDARD.encode(&bytes)),
            folder,
            public_id,
        };

        let reply: UploadReply = self
            .post_json("/upload", &body)
            .await?
            .json()
            .await
            .map_err(|e| MediaError::Compositing(e.to_string()))?;

        Ok(reply
            .asset_id
            .or(reply.public_id)
            .unwrap_or_else(|| format!("{folder}/{public_id}")))
    }

    async fn create_collage(&self, request: &CollageRequest) -> Result<String, MediaError> {
        let reply: CollageReply = self
            .post_json("/collage", request)
            .await?
            .json()
            .await
            .map_err(|e| MediaError::Compositing(e.to_string()))?;
        Ok(reply.url)
    }
}

/// Renders collages in-process and writes them through object storage.
pub struct LocalCompositor {
    assets: DashMap<String, Vec<u8>>,
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
}

impl LocalCompositor {
    pub fn new(storage: Arc<dyn ObjectStorage>, bucket: impl Into<String>) -> Self {
        Self {
            assets: DashMap::new(),
            storage,
            bucket: bucket.into(),
        }
    }
}

/// Draws every cell onto a white canvas. Images are centre-cropped to the
/// cell's aspect ratio and scaled to fill it.
pub fn render_collage(
    request: &CollageRequest,
    images: &[(DynamicImage, u32, u32)],
) -> Result<RgbaImage, MediaError> {
    let mut canvas = RgbaImage::from_pixel(
        request.canvas_width,
        request.canvas_height,
        Rgba([255, 255, 255, 255]),
    );
    for (img, row, column) in images {
        let rect = request.cell_rect(*row, *column).ok_or_else(|| {
            MediaError::Compositing(format!("cell ({row}, {column}) is outside the canvas"))
        })?;
        let filled = img.resize_to_fill(rect.width, rect.height, FilterType::Triangle);
        imageops::overlay(&mut canvas, &filled.to_rgba8(), i64::from(rect.x), i64::from(rect.y));
    }
    Ok(canvas)
}

#[async_trait]
impl CompositingService for LocalCompositor {
    async fn upload(&self, bytes: Vec<u8>, folder: &str, public_id: &str) -> Result<String, MediaError> {
        let asset_id = format!("{folder}/{public_id}");
        self.assets.insert(asset_id.clone(), bytes);
        Ok(asset_id)
    }

    async fn create_collage(&self, request: &CollageRequest) -> Result<String, MediaError> {
        let mut images = Vec::with_capacity(request.cells.len());
        for cell in &request.cells {
            // assets are consumed by the collage that lists them
            let (_, bytes) = self
                .assets
                .remove(&cell.asset_id)
                .ok_or_else(|| MediaError::Compositing(format!("unknown asset {}", cell.asset_id)))?;
            let img = image::load_from_memory(&bytes).map_err(|e| MediaError::Decode(e.to_string()))?;
            images.push((img, cell.row, cell.column));
        }

        let canvas = render_collage(request, &images)?;
        let png = encode(&DynamicImage::ImageRgba8(canvas), ImageFormat::Png)?;
        self.storage
            .put(
                &self.bucket,
                &format!("collages/{}.png", request.collage_id),
                png,
                "image/png",
            )
            .await
            .map_err(|e| MediaError::Compositing(e.to_string()))
    }

    async fn discard(&self, folder: &str) {
        let prefix = format!("{folder}/");
        self.assets.retain(|asset_id, _| !asset_id.starts_with(&prefix));
    }
}
