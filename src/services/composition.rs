use serde::{Deserialize, Serialize};

use crate::models::brand::BrandIdentity;
use crate::models::creative::{CreativeCopy, CreativeFormat};
use crate::models::template::{LayoutStyle, Template};
use crate::services::scoring::{best_text_color, contrast_ratio, Rgb};

/// Panel color used when a brand has no usable primary color.
const FALLBACK_PANEL: Rgb = Rgb(0x1f, 0x29, 0x37);

/// Panel opacity for text-overlay layouts, out of 255.
const OVERLAY_ALPHA: u8 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    fn fits_in(&self, width: u32, height: u32) -> bool {
        self.x + self.width <= width && self.y + self.height <= height
    }
}

/// Where everything goes on one format's canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutSpec {
    pub format: CreativeFormat,
    pub width: u32,
    pub height: u32,
    pub image_region: Rect,
    pub panel: Rect,
    pub panel_color: String,
    pub panel_alpha: u8,
    pub text_color: String,
    pub accent_color: Option<String>,
    pub headline_size: u32,
    pub body_size: u32,
    pub font_family: Option<String>,
    pub contrast: f64,
}

impl LayoutSpec {
    pub fn panel_rgb(&self) -> Rgb {
        Rgb::from_hex(&self.panel_color).unwrap_or(FALLBACK_PANEL)
    }
}

/// Layouts for every format of one creative plus its copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionPlan {
    pub template_id: uuid::Uuid,
    pub layout: LayoutStyle,
    pub copy: CreativeCopy,
    pub layouts: Vec<LayoutSpec>,
}

impl CompositionPlan {
    /// Lowest contrast across formats; the value the score is judged on.
    pub fn min_contrast(&self) -> f64 {
        self.layouts
            .iter()
            .map(|l| l.contrast)
            .fold(f64::INFINITY, f64::min)
    }

    pub fn formats(&self) -> Vec<CreativeFormat> {
        self.layouts.iter().map(|l| l.format).collect()
    }
}

/// Plan the canvases for `formats`.
pub fn compose(
    template: &Template,
    identity: &BrandIdentity,
    copy: &CreativeCopy,
    formats: &[CreativeFormat],
) -> CompositionPlan {
    let panel = identity
        .primary_color
        .as_deref()
        .and_then(Rgb::from_hex)
        .unwrap_or(FALLBACK_PANEL);
    let text = best_text_color(panel);

    let layouts = formats
        .iter()
        .map(|&format| layout_for(template.layout, format, panel, text, identity))
        .collect();

    CompositionPlan {
        template_id: template.id,
        layout: template.layout,
        copy: copy.clone(),
        layouts,
    }
}

fn layout_for(
    style: LayoutStyle,
    format: CreativeFormat,
    panel_color: Rgb,
    text_color: Rgb,
    identity: &BrandIdentity,
) -> LayoutSpec {
    let (width, height) = format.dimensions();
    let full = Rect::new(0, 0, width, height);

    let (image_region, panel, panel_alpha) = match style {
        LayoutStyle::HeroImage => {
            let band = height * 3 / 10;
            (
                Rect::new(0, 0, width, height - band),
                Rect::new(0, height - band, width, band),
                255,
            )
        }
        LayoutStyle::SplitPanel if width > height => {
            let half = width / 2;
            (
                Rect::new(0, 0, half, height),
                Rect::new(half, 0, width - half, height),
                255,
            )
        }
        LayoutStyle::SplitPanel => {
            let half = height / 2;
            (
                Rect::new(0, 0, width, half),
                Rect::new(0, half, width, height - half),
                255,
            )
        }
        LayoutStyle::TextOverlay => {
            let margin = width / 18;
            let band = height / 4;
            (
                full,
                Rect::new(margin, height - band - margin, width - 2 * margin, band),
                OVERLAY_ALPHA,
            )
        }
    };

    // Type scales with the short edge of the canvas.
    let short_edge = width.min(height);
    let headline_size = (short_edge / 14).max(24);
    let body_size = (short_edge / 30).max(14);

    LayoutSpec {
        format,
        width,
        height,
        image_region,
        panel,
        panel_color: panel_color.to_hex(),
        panel_alpha,
        text_color: text_color.to_hex(),
        accent_color: identity.accent_color.clone(),
        headline_size,
        body_size,
        font_family: identity.font_family.clone(),
        contrast: contrast_ratio(panel_color, text_color),
    }
}

/// Sanity check used by the renderer before drawing.
pub fn layout_is_within_canvas(layout: &LayoutSpec) -> bool {
    layout.image_region.fits_in(layout.width, layout.height)
        && layout.panel.fits_in(layout.width, layout.height)
        && layout.image_region.area() > 0
}
