use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::models::brand::{Brand, BrandIdentity};
use crate::services::providers::ProviderError;

/// What the brand's website tells us about its identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteInsights {
    pub title: Option<String>,
    pub description: Option<String>,
    pub theme_color: Option<String>,
    /// Hex colors, most frequent first.
    pub palette: Vec<String>,
    pub font_family: Option<String>,
    pub headings: Vec<String>,
    pub logo_url: Option<String>,
}

impl SiteInsights {
    /// Insights for a brand analysed from its stored identity alone.
    pub fn from_identity(brand: &Brand) -> Self {
        let identity = &brand.identity;
        Self {
            title: Some(brand.name.clone()),
            description: identity.description.clone(),
            theme_color: identity.primary_color.clone(),
            palette: [
                &identity.primary_color,
                &identity.secondary_color,
                &identity.accent_color,
            ]
            .into_iter()
            .flatten()
            .cloned()
            .collect(),
            font_family: identity.font_family.clone(),
            headings: Vec::new(),
            logo_url: identity.logo_url.clone(),
        }
    }

    /// One-line summary used in generation prompts.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(title) = &self.title {
            parts.push(title.clone());
        }
        if let Some(description) = &self.description {
            parts.push(description.clone());
        }
        parts.extend(self.headings.iter().take(3).cloned());
        parts.join(" | ")
    }

    /// Identity derived from the site, used to fill gaps in the stored one.
    pub fn to_identity(&self) -> BrandIdentity {
        let mut colors = self
            .theme_color
            .iter()
            .chain(self.palette.iter())
            .filter_map(|c| normalize_hex(c));
        let primary = colors.next();
        let secondary = colors.find(|c| Some(c) != primary.as_ref());
        let accent = colors.find(|c| Some(c) != primary.as_ref() && Some(c) != secondary.as_ref());

        BrandIdentity {
            primary_color: primary,
            secondary_color: secondary,
            accent_color: accent,
            font_family: self.font_family.clone(),
            description: self.description.clone(),
            logo_url: self.logo_url.clone(),
        }
    }
}

/// Fetches a brand website's HTML.
#[async_trait]
pub trait SiteFetcher: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<String, ProviderError>;
}

pub struct HttpSiteFetcher {
    http: Client,
}

impl HttpSiteFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("creative-engine/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl SiteFetcher for HttpSiteFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String, ProviderError> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Extract brand signals from a page.
pub fn analyze_html(html: &str) -> SiteInsights {
    let doc = Html::parse_document(html);

    let title = first_text(&doc, "title");
    let description = first_attr(&doc, r#"meta[name="description"]"#, "content")
        .or_else(|| first_attr(&doc, r#"meta[property="og:description"]"#, "content"));
    let theme_color = first_attr(&doc, r#"meta[name="theme-color"]"#, "content")
        .and_then(|c| normalize_hex(&c));
    let logo_url = first_attr(&doc, r#"meta[property="og:image"]"#, "content")
        .or_else(|| first_attr(&doc, r#"link[rel="icon"]"#, "href"));

    let mut css = String::new();
    if let Ok(selector) = Selector::parse("style") {
        for style in doc.select(&selector) {
            css.push_str(&style.text().collect::<String>());
            css.push('\n');
        }
    }
    if let Ok(selector) = Selector::parse("[style]") {
        for el in doc.select(&selector) {
            if let Some(inline) = el.value().attr("style") {
                css.push_str(inline);
                css.push('\n');
            }
        }
    }

    let headings = Selector::parse("h1, h2")
        .map(|selector| {
            doc.select(&selector)
                .map(|h| collapse_whitespace(&h.text().collect::<String>()))
                .filter(|h| !h.is_empty())
                .take(5)
                .collect()
        })
        .unwrap_or_default();

    SiteInsights {
        title,
        description,
        theme_color,
        palette: hex_palette(&css, 5),
        font_family: first_font_family(&css),
        headings,
        logo_url,
    }
}

fn first_text(doc: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    let text = collapse_whitespace(&doc.select(&selector).next()?.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

fn first_attr(doc: &Html, css: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    doc.select(&selector)
        .filter_map(|el| el.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize `#abc` / `#AABBCC` to lowercase six-digit form.
pub fn normalize_hex(color: &str) -> Option<String> {
    let hex = color.trim().strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        6 => Some(format!("#{}", hex.to_ascii_lowercase())),
        3 => {
            let expanded: String = hex
                .chars()
                .flat_map(|c| [c, c])
                .collect::<String>()
                .to_ascii_lowercase();
            Some(format!("#{expanded}"))
        }
        _ => None,
    }
}

/// Most frequent hex colors in a stylesheet, ignoring pure black and white.
fn hex_palette(css: &str, limit: usize) -> Vec<String> {
    let bytes = css.as_bytes();
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'#' {
            let run = bytes[i + 1..]
                .iter()
                .take_while(|b| b.is_ascii_hexdigit())
                .count();
            if run == 3 || run == 6 {
                if let Some(color) = normalize_hex(&css[i..=i + run]) {
                    if color != "#000000" && color != "#ffffff" {
                        let first_seen = counts.len();
                        counts.entry(color).or_insert((0, first_seen)).0 += 1;
                    }
                }
            }
            i += run + 1;
        } else {
            i += 1;
        }
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(limit).map(|(c, _)| c).collect()
}

fn first_font_family(css: &str) -> Option<String> {
    let lower = css.to_ascii_lowercase();
    let start = lower.find("font-family")? + "font-family".len();
    let rest = css[start..].trim_start().strip_prefix(':')?;
    let value = rest.split([';', '}', '\n']).next()?;
    let first = value.split(',').next()?.trim().trim_matches(['"', '\'']);
    (!first.is_empty()).then(|| first.to_string())
}
