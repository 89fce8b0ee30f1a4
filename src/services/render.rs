use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

use crate::models::creative::CreativeFormat;
use crate::services::composition::{layout_is_within_canvas, LayoutSpec, Rect};
use crate::services::scoring::Rgb;

/// Height of the accent stripe along the panel's top edge.
const ACCENT_STRIPE: u32 = 8;

/// One encoded canvas.
#[derive(Debug, Clone)]
pub struct RenderedCanvas {
    pub format: CreativeFormat,
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

/// Decode a generated image once so several formats can share it.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, RenderError> {
    image::load_from_memory(bytes).map_err(RenderError::Decode)
}

/// Draw one canvas: cover-crop the source into the image region, then
/// paint the copy panel over it.
pub fn render_canvas(source: &DynamicImage, layout: &LayoutSpec) -> Result<RenderedCanvas, RenderError> {
    if !layout_is_within_canvas(layout) {
        return Err(RenderError::InvalidLayout(layout.format));
    }

    let mut canvas = RgbaImage::from_pixel(layout.width, layout.height, Rgba([0, 0, 0, 255]));

    let region = layout.image_region;
    let fitted = source
        .resize_to_fill(region.width, region.height, FilterType::Triangle)
        .to_rgba8();
    imageops::overlay(&mut canvas, &fitted, i64::from(region.x), i64::from(region.y));

    let panel = layout.panel_rgb();
    fill_blend(&mut canvas, layout.panel, panel, layout.panel_alpha);

    if let Some(accent) = layout.accent_color.as_deref().and_then(Rgb::from_hex) {
        let stripe = Rect::new(
            layout.panel.x,
            layout.panel.y,
            layout.panel.width,
            ACCENT_STRIPE.min(layout.panel.height),
        );
        fill_blend(&mut canvas, stripe, accent, 255);
    }

    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut png, ImageFormat::Png)
        .map_err(RenderError::Encode)?;

    Ok(RenderedCanvas {
        format: layout.format,
        width: layout.width,
        height: layout.height,
        png: png.into_inner(),
    })
}

/// Render every layout of a plan against one source image.
pub fn render_all(bytes: &[u8], layouts: &[LayoutSpec]) -> Result<Vec<RenderedCanvas>, RenderError> {
    let source = decode(bytes)?;
    layouts.iter().map(|l| render_canvas(&source, l)).collect()
}

fn fill_blend(canvas: &mut RgbaImage, rect: Rect, color: Rgb, alpha: u8) {
    let a = u32::from(alpha);
    let blend = |under: u8, over: u8| -> u8 {
        ((u32::from(over) * a + u32::from(under) * (255 - a) + 127) / 255) as u8
    };
    let x_end = (rect.x + rect.width).min(canvas.width());
    let y_end = (rect.y + rect.height).min(canvas.height());
    for y in rect.y..y_end {
        for x in rect.x..x_end {
            let px = canvas.get_pixel_mut(x, y);
            px.0 = [
                blend(px.0[0], color.0),
                blend(px.0[1], color.1),
                blend(px.0[2], color.2),
                255,
            ];
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Failed to decode generated image: {0}")]
    Decode(image::ImageError),

    #[error("Failed to encode canvas: {0}")]
    Encode(image::ImageError),

    #[error("Layout for {0} does not fit its canvas")]
    InvalidLayout(CreativeFormat),

    #[error("Render task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
