//! Core domain model for the stays scraping and import pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "stays-core";

/// One facility category as scraped: its icon plus nested sub-facilities
/// (name → icon).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityCategory {
    #[serde(default)]
    pub svg: String,
    #[serde(default)]
    pub sub_facilities: BTreeMap<String, String>,
}

/// One room as scraped. The content map is heterogeneous by design and is
/// carried verbatim; the schema only checks it is a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRoom {
    pub room_name: String,
    #[serde(default)]
    pub bed_type: Option<String>,
    #[serde(default)]
    pub adult_count: i32,
    #[serde(default)]
    pub children_count: i32,
    #[serde(default)]
    pub content_text: Option<serde_json::Value>,
}

impl RawRoom {
    /// The content map when it is a well-formed JSON object. Anything else
    /// is treated as absent so a bad cell never aborts an import.
    pub fn valid_content(&self) -> Option<&serde_json::Value> {
        self.content_text.as_ref().filter(|v| v.is_object())
    }

    /// Room-scoped image URLs live inside the content map under `images_urls`.
    pub fn image_urls(&self) -> Vec<String> {
        self.valid_content()
            .and_then(|v| v.get("images_urls"))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One scraped hotel before relational normalization.
///
/// `url` is the sole deduplication key across re-scrapes: importing the same
/// URL twice is a full subgraph replacement, never a merge. Coordinates and
/// the rating value are kept verbatim as text to preserve the source
/// formatting; they are parsed only at import time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHotelRecord {
    pub title: Option<String>,
    pub address: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub address_country: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub description: Option<String>,
    pub stars: Option<i32>,
    pub rating_value: Option<String>,
    pub rating_text: Option<String>,
    pub url: String,
    pub image_links: Vec<String>,
    pub most_famous_facilities: BTreeMap<String, String>,
    pub all_facilities: BTreeMap<String, FacilityCategory>,
    pub rooms: Vec<RawRoom>,
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record has no url")]
    MissingUrl,
    #[error("unparseable coordinate: {0}")]
    BadCoordinate(String),
}

impl RawHotelRecord {
    /// Checks the invariants a record must satisfy before import. A failing
    /// record is skipped and counted by the caller, never fatal to a batch.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.url.trim().is_empty() {
            return Err(RecordError::MissingUrl);
        }
        parse_coordinate(self.latitude.as_deref())?;
        parse_coordinate(self.longitude.as_deref())?;
        Ok(())
    }

    pub fn latitude_value(&self) -> Result<Option<f64>, RecordError> {
        parse_coordinate(self.latitude.as_deref())
    }

    pub fn longitude_value(&self) -> Result<Option<f64>, RecordError> {
        parse_coordinate(self.longitude.as_deref())
    }

    /// Rating parsed leniently: a malformed value degrades to `None` rather
    /// than rejecting the record.
    pub fn rating_number(&self) -> Option<f64> {
        self.rating_value
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<f64>().ok())
    }
}

/// An empty or whitespace coordinate is absent; a present one must parse.
fn parse_coordinate(value: Option<&str>) -> Result<Option<f64>, RecordError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text
            .parse::<f64>()
            .map(Some)
            .map_err(|_| RecordError::BadCoordinate(text.to_string())),
    }
}

/// One facility occurrence flattened out of the raw maps, ready to resolve
/// against the facilities table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacilityLink {
    pub name: String,
    pub icon: Option<String>,
    pub category: Option<&'static str>,
    pub most_famous: bool,
    pub sub_facility: bool,
    /// Parent facility name; guaranteed to appear earlier in the flattened
    /// sequence so its row exists before the child is written.
    pub parent: Option<String>,
}

/// Flattens the most-famous map and the full facility tree into a single
/// sequence: most-famous entries first, then each category followed by its
/// sub-facilities. Blank names are dropped.
pub fn flatten_facilities(record: &RawHotelRecord) -> Vec<FacilityLink> {
    let mut links = Vec::new();

    for (name, icon) in &record.most_famous_facilities {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        links.push(FacilityLink {
            name: name.to_string(),
            icon: non_empty(icon),
            category: None,
            most_famous: true,
            sub_facility: false,
            parent: None,
        });
    }

    for (category_name, category) in &record.all_facilities {
        let category_name = category_name.trim();
        if category_name.is_empty() {
            continue;
        }
        links.push(FacilityLink {
            name: category_name.to_string(),
            icon: non_empty(&category.svg),
            category: Some("main"),
            most_famous: false,
            sub_facility: false,
            parent: None,
        });
        for (sub_name, sub_icon) in &category.sub_facilities {
            let sub_name = sub_name.trim();
            if sub_name.is_empty() {
                continue;
            }
            links.push(FacilityLink {
                name: sub_name.to_string(),
                icon: non_empty(sub_icon),
                category: Some("sub"),
                most_famous: false,
                sub_facility: true,
                parent: Some(category_name.to_string()),
            });
        }
    }

    links
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// What a scraping job should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    LinksOnly,
    HotelsOnly,
    Complete,
    CompleteForceUpdateLinks,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LinksOnly => "links_only",
            Self::HotelsOnly => "hotels_only",
            Self::Complete => "complete",
            Self::CompleteForceUpdateLinks => "complete_force_update_links",
        }
    }

    pub fn runs_link_phase(self) -> bool {
        !matches!(self, Self::HotelsOnly)
    }

    pub fn runs_hotel_phase(self) -> bool {
        !matches!(self, Self::LinksOnly)
    }

    /// Whether the link phase must re-collect even when a cached links file
    /// already exists.
    pub fn forces_link_update(self) -> bool {
        matches!(self, Self::LinksOnly | Self::CompleteForceUpdateLinks)
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "links_only" => Ok(Self::LinksOnly),
            "hotels_only" => Ok(Self::HotelsOnly),
            "complete" => Ok(Self::Complete),
            "complete_force_update_links" => Ok(Self::CompleteForceUpdateLinks),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a scraping job. Terminal states are final; no state is
/// re-enterable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Stopped,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Stopped => "STOPPED",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            "STOPPED" => Ok(Self::Stopped),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress as a percentage of completed items, clamped to 0..=100.
pub fn progress_percent(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((completed as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
}
