use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Meta placement formats a creative is rendered into.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Display,
    EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CreativeFormat {
    Landscape,
    Square,
    Story,
}

impl CreativeFormat {
    /// Canvas size in pixels (width, height).
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Landscape => (1200, 628),
            Self::Square => (1080, 1080),
            Self::Story => (1080, 1920),
        }
    }

    /// Size string requested from the image provider for this format.
    pub fn provider_size(self) -> &'static str {
        match self {
            Self::Landscape => "1536x1024",
            Self::Square => "1024x1024",
            Self::Story => "1024x1536",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CreativeStatus {
    Ready,
    Archived,
}

/// One rendered file in the asset store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderedAsset {
    pub key: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub content_type: String,
}

/// Rendered files per format; any subset may be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreativeAssets {
    pub landscape: Option<RenderedAsset>,
    pub square: Option<RenderedAsset>,
    pub story: Option<RenderedAsset>,
}

impl CreativeAssets {
    pub fn set(&mut self, format: CreativeFormat, asset: RenderedAsset) {
        match format {
            CreativeFormat::Landscape => self.landscape = Some(asset),
            CreativeFormat::Square => self.square = Some(asset),
            CreativeFormat::Story => self.story = Some(asset),
        }
    }

    pub fn get(&self, format: CreativeFormat) -> Option<&RenderedAsset> {
        match format {
            CreativeFormat::Landscape => self.landscape.as_ref(),
            CreativeFormat::Square => self.square.as_ref(),
            CreativeFormat::Story => self.story.as_ref(),
        }
    }

    pub fn formats(&self) -> Vec<CreativeFormat> {
        let mut formats = Vec::new();
        if self.landscape.is_some() {
            formats.push(CreativeFormat::Landscape);
        }
        if self.square.is_some() {
            formats.push(CreativeFormat::Square);
        }
        if self.story.is_some() {
            formats.push(CreativeFormat::Story);
        }
        formats
    }
}

/// Ad copy attached to a creative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreativeCopy {
    pub headline: String,
    pub primary_text: String,
    pub description: String,
    pub call_to_action: String,
}

/// A generated, brand-specific ad asset bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Creative {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub template_id: Uuid,
    pub job_id: Option<Uuid>,
    pub copy: CreativeCopy,
    pub assets: CreativeAssets,
    pub validation_score: f64,
    pub status: CreativeStatus,
    pub created_at: DateTime<Utc>,
}
