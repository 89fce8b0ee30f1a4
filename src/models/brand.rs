use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Visual and verbal identity of a brand.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BrandIdentity {
    /// Hex colors, e.g. `#1A73E8`.
    #[garde(pattern(r"^#[0-9a-fA-F]{6}$"))]
    pub primary_color: Option<String>,

    #[garde(pattern(r"^#[0-9a-fA-F]{6}$"))]
    pub secondary_color: Option<String>,

    #[garde(pattern(r"^#[0-9a-fA-F]{6}$"))]
    pub accent_color: Option<String>,

    #[garde(length(max = 100))]
    pub font_family: Option<String>,

    #[garde(length(max = 1000))]
    pub description: Option<String>,

    #[garde(length(max = 2048))]
    pub logo_url: Option<String>,
}

impl BrandIdentity {
    /// Fill gaps in `self` with values from `other`. Existing values win.
    pub fn merged_with(&self, other: &BrandIdentity) -> BrandIdentity {
        BrandIdentity {
            primary_color: self.primary_color.clone().or_else(|| other.primary_color.clone()),
            secondary_color: self
                .secondary_color
                .clone()
                .or_else(|| other.secondary_color.clone()),
            accent_color: self.accent_color.clone().or_else(|| other.accent_color.clone()),
            font_family: self.font_family.clone().or_else(|| other.font_family.clone()),
            description: self.description.clone().or_else(|| other.description.clone()),
            logo_url: self.logo_url.clone().or_else(|| other.logo_url.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Brand {
    pub id: Uuid,
    pub name: String,
    pub website: Option<String>,
    pub identity: BrandIdentity,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
