//! Durable CSV checkpoint store sitting between scraping phases and the
//! relational import.

use std::fs::{self, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use stays_core::{FacilityCategory, RawHotelRecord, RawRoom};
use tracing::warn;

pub const CRATE_NAME: &str = "stays-storage";

/// Well-known checkpoint files under the data directory: one per run phase.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub links: PathBuf,
    pub hotels: PathBuf,
}

impl DataPaths {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            links: dir.join("links.csv"),
            hotels: dir.join("hotels.csv"),
        }
    }
}

/// Append-only CSV store over serde rows.
///
/// The first append on a fresh file writes the header; later appends reopen
/// the file in append mode and never truncate, so a crash mid-run loses at
/// most the in-flight batch.
#[derive(Debug, Clone)]
pub struct CsvStore<T> {
    path: PathBuf,
    _row: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> CsvStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _row: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Whether the file holds at least one data row beyond the header.
    pub fn has_rows(&self) -> Result<bool> {
        if !self.exists() {
            return Ok(false);
        }
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        Ok(reader.records().next().transpose()?.is_some())
    }

    pub fn append(&self, rows: &[T]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let fresh = !self.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(fresh)
            .from_writer(file);
        for row in rows {
            writer
                .serialize(row)
                .with_context(|| format!("writing row to {}", self.path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("flushing {}", self.path.display()))?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<T>> {
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            rows.push(row.with_context(|| format!("reading row from {}", self.path.display()))?);
        }
        Ok(rows)
    }

    /// Drops the file entirely. Used when a forced link run replaces the
    /// cached links file; normal runs only ever append.
    pub fn remove(&self) -> Result<()> {
        if self.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("removing {}", self.path.display()))?;
        }
        Ok(())
    }
}

/// One collected hotel-detail link. Column order mirrors the links file of
/// the scraper: page counter, link, originating seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRow {
    pub page: u32,
    pub url: String,
    pub seed: String,
}

/// Flat CSV image of a [`RawHotelRecord`].
///
/// Composite fields (image list, facility maps, room array) are JSON encoded
/// in their cells; the column order is fixed and documented, and text is
/// plain UTF-8 so multi-script data survives the round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelCsvRow {
    pub title: Option<String>,
    pub address: Option<String>,
    pub region: Option<String>,
    #[serde(rename = "postalCode")]
    pub postal_code: Option<String>,
    #[serde(rename = "addressCountry")]
    pub address_country: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub description: Option<String>,
    pub stars: Option<i32>,
    pub rating_value: Option<String>,
    pub rating_text: Option<String>,
    pub url: String,
    pub image_links: String,
    pub most_famous_facilities: String,
    pub all_facilities: String,
    pub rooms: String,
    pub scraped_at: String,
}

impl HotelCsvRow {
    pub fn from_record(record: &RawHotelRecord) -> Result<Self> {
        Ok(Self {
            title: record.title.clone(),
            address: record.address.clone(),
            region: record.region.clone(),
            postal_code: record.postal_code.clone(),
            address_country: record.address_country.clone(),
            latitude: record.latitude.clone(),
            longitude: record.longitude.clone(),
            description: record.description.clone(),
            stars: record.stars,
            rating_value: record.rating_value.clone(),
            rating_text: record.rating_text.clone(),
            url: record.url.clone(),
            image_links: serde_json::to_string(&record.image_links)
                .context("encoding image_links cell")?,
            most_famous_facilities: serde_json::to_string(&record.most_famous_facilities)
                .context("encoding most_famous_facilities cell")?,
            all_facilities: serde_json::to_string(&record.all_facilities)
                .context("encoding all_facilities cell")?,
            rooms: serde_json::to_string(&record.rooms).context("encoding rooms cell")?,
            scraped_at: record.scraped_at.to_rfc3339(),
        })
    }

    /// Decodes the row back into a raw record. Composite cells are parsed
    /// leniently: a malformed cell degrades to its empty default with a
    /// warning so one bad cell never drops the whole row.
    pub fn into_record(self) -> RawHotelRecord {
        let scraped_at = DateTime::parse_from_rfc3339(&self.scraped_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| {
                warn!(url = %self.url, cell = %self.scraped_at, "bad scraped_at cell, using epoch");
                DateTime::UNIX_EPOCH
            });

        RawHotelRecord {
            title: self.title,
            address: self.address,
            region: self.region,
            postal_code: self.postal_code,
            address_country: self.address_country,
            latitude: self.latitude,
            longitude: self.longitude,
            description: self.description,
            stars: self.stars,
            rating_value: self.rating_value,
            rating_text: self.rating_text,
            image_links: decode_cell(&self.image_links, &self.url, "image_links"),
            most_famous_facilities: decode_cell(
                &self.most_famous_facilities,
                &self.url,
                "most_famous_facilities",
            ),
            all_facilities: decode_cell::<std::collections::BTreeMap<String, FacilityCategory>>(
                &self.all_facilities,
                &self.url,
                "all_facilities",
            ),
            rooms: decode_cell::<Vec<RawRoom>>(&self.rooms, &self.url, "rooms"),
            url: self.url,
            scraped_at,
        }
    }
}

fn decode_cell<T: DeserializeOwned + Default>(cell: &str, url: &str, what: &str) -> T {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return T::default();
    }
    match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(err) => {
            warn!(url, cell = what, %err, "malformed JSON cell, using empty default");
            T::default()
        }
    }
}
