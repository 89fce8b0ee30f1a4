use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::creative::CreativeFormat;

/// How the generated image and the copy panel share the canvas.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LayoutStyle {
    /// Full-bleed image with a copy band along the bottom edge.
    HeroImage,
    /// Image and copy side by side (stacked on tall canvases).
    SplitPanel,
    /// Translucent copy panel drawn over the image.
    TextOverlay,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub layout: LayoutStyle,
    pub formats: Vec<CreativeFormat>,
}

impl Template {
    /// Formats to render for a request; an empty request means all supported.
    pub fn formats_for(&self, requested: &[CreativeFormat]) -> Vec<CreativeFormat> {
        if requested.is_empty() {
            return self.formats.clone();
        }
        self.formats
            .iter()
            .copied()
            .filter(|f| requested.contains(f))
            .collect()
    }
}
