//! Creative quality checks: Meta copy limits, call-to-action validity,
//! WCAG contrast, and near-duplicate detection for copy variants.

use crate::models::creative::{CreativeCopy, CreativeFormat};

pub const HEADLINE_MAX: usize = 40;
pub const PRIMARY_TEXT_MAX: usize = 125;
pub const DESCRIPTION_MAX: usize = 30;

/// Minimum WCAG AA contrast for normal text.
pub const MIN_CONTRAST: f64 = 4.5;

/// Headlines at least this similar (Jaro-Winkler) count as duplicates.
pub const DUPLICATE_SIMILARITY: f64 = 0.92;

pub const CALLS_TO_ACTION: &[&str] = &[
    "LEARN_MORE",
    "SHOP_NOW",
    "SIGN_UP",
    "BOOK_NOW",
    "CONTACT_US",
    "DOWNLOAD",
    "GET_OFFER",
    "SUBSCRIBE",
];

/// An RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const WHITE: Rgb = Rgb(255, 255, 255);
    pub const BLACK: Rgb = Rgb(0, 0, 0);

    /// Parse `#rrggbb`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.trim().strip_prefix('#')?;
        if digits.len() != 6 || !digits.is_ascii() {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&digits[range], 16).ok();
        Some(Rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }

    /// WCAG relative luminance.
    pub fn luminance(self) -> f64 {
        fn linear(c: u8) -> f64 {
            let c = f64::from(c) / 255.0;
            if c <= 0.03928 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        }
        0.2126 * linear(self.0) + 0.7152 * linear(self.1) + 0.0722 * linear(self.2)
    }
}

/// WCAG contrast ratio, in `[1, 21]`.
pub fn contrast_ratio(a: Rgb, b: Rgb) -> f64 {
    let (la, lb) = (a.luminance(), b.luminance());
    let (hi, lo) = if la >= lb { (la, lb) } else { (lb, la) };
    (hi + 0.05) / (lo + 0.05)
}

/// White or black, whichever reads better on `background`.
pub fn best_text_color(background: Rgb) -> Rgb {
    if contrast_ratio(Rgb::WHITE, background) >= contrast_ratio(Rgb::BLACK, background) {
        Rgb::WHITE
    } else {
        Rgb::BLACK
    }
}

/// Individual check results that make up a validation score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    pub headline_ok: bool,
    pub primary_text_ok: bool,
    pub description_ok: bool,
    pub call_to_action_ok: bool,
    pub contrast: f64,
    /// Rendered formats over requested formats.
    pub coverage: f64,
}

impl ScoreBreakdown {
    /// Weighted score in `[0, 1]`.
    pub fn score(&self) -> f64 {
        let weight = |ok: bool, w: f64| if ok { w } else { 0.0 };
        let contrast = (self.contrast / MIN_CONTRAST).min(1.0);
        let score = weight(self.headline_ok, 0.2)
            + weight(self.primary_text_ok, 0.15)
            + weight(self.description_ok, 0.1)
            + weight(self.call_to_action_ok, 0.15)
            + 0.2 * contrast
            + 0.2 * self.coverage.clamp(0.0, 1.0);
        (score * 1000.0).round() / 1000.0
    }
}

pub fn check_copy_limits(copy: &CreativeCopy) -> (bool, bool, bool) {
    let len = |s: &str| s.chars().count();
    (
        !copy.headline.trim().is_empty() && len(&copy.headline) <= HEADLINE_MAX,
        len(&copy.primary_text) <= PRIMARY_TEXT_MAX,
        len(&copy.description) <= DESCRIPTION_MAX,
    )
}

pub fn is_valid_call_to_action(cta: &str) -> bool {
    CALLS_TO_ACTION.contains(&cta)
}

pub fn score_creative(
    copy: &CreativeCopy,
    panel: Rgb,
    text: Rgb,
    rendered: &[CreativeFormat],
    requested: &[CreativeFormat],
) -> ScoreBreakdown {
    let (headline_ok, primary_text_ok, description_ok) = check_copy_limits(copy);
    let coverage = if requested.is_empty() {
        0.0
    } else {
        let hit = requested.iter().filter(|f| rendered.contains(f)).count();
        hit as f64 / requested.len() as f64
    };
    ScoreBreakdown {
        headline_ok,
        primary_text_ok,
        description_ok,
        call_to_action_ok: is_valid_call_to_action(&copy.call_to_action),
        contrast: contrast_ratio(panel, text),
        coverage,
    }
}

/// Bring provider copy within Meta limits, cutting on a word boundary.
pub fn fit_copy(copy: CreativeCopy) -> CreativeCopy {
    CreativeCopy {
        headline: truncate_words(copy.headline.trim(), HEADLINE_MAX),
        primary_text: truncate_words(copy.primary_text.trim(), PRIMARY_TEXT_MAX),
        description: truncate_words(copy.description.trim(), DESCRIPTION_MAX),
        call_to_action: if is_valid_call_to_action(&copy.call_to_action) {
            copy.call_to_action
        } else {
            "LEARN_MORE".to_string()
        },
    }
}

fn truncate_words(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    match cut.rfind(' ') {
        Some(pos) if pos > 0 => cut[..pos].trim_end().to_string(),
        _ => cut,
    }
}

/// Drop variants whose headline nearly repeats an earlier one.
pub fn dedupe_variants(variants: Vec<CreativeCopy>) -> Vec<CreativeCopy> {
    let mut kept: Vec<CreativeCopy> = Vec::with_capacity(variants.len());
    for variant in variants {
        let headline = variant.headline.to_lowercase();
        let duplicate = kept.iter().any(|k| {
            strsim::jaro_winkler(&k.headline.to_lowercase(), &headline) >= DUPLICATE_SIMILARITY
        });
        if !duplicate {
            kept.push(variant);
        }
    }
    kept
}
