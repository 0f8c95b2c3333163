//! Row types of the shared store and the small value types built around them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Booking portal link offered on every actionable row.
pub const BOOK_URL: &str =
    "https://mainebmvappt.cxmflow.com/Appointment/Index/2c052fc7-571f-4b76-9790-7e91f103c408";

/// Branch offices covered by the scraper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Office {
    Augusta,
    Bangor,
    Calais,
    Caribou,
    Ellsworth,
    Kennebunk,
    Lewiston,
    Portland,
    Rockland,
    Rumford,
    Scarborough,
    Springvale,
    Topsham,
}

impl Office {
    pub const ALL: [Office; 13] = [
        Office::Augusta,
        Office::Bangor,
        Office::Calais,
        Office::Caribou,
        Office::Ellsworth,
        Office::Kennebunk,
        Office::Lewiston,
        Office::Portland,
        Office::Rockland,
        Office::Rumford,
        Office::Scarborough,
        Office::Springvale,
        Office::Topsham,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Office::Augusta => "Augusta",
            Office::Bangor => "Bangor",
            Office::Calais => "Calais",
            Office::Caribou => "Caribou",
            Office::Ellsworth => "Ellsworth",
            Office::Kennebunk => "Kennebunk",
            Office::Lewiston => "Lewiston",
            Office::Portland => "Portland",
            Office::Rockland => "Rockland",
            Office::Rumford => "Rumford",
            Office::Scarborough => "Scarborough",
            Office::Springvale => "Springvale",
            Office::Topsham => "Topsham",
        }
    }
}

impl fmt::Display for Office {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Office {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Office::ALL
            .iter()
            .copied()
            .find(|office| office.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown office: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotType {
    /// Within the short-notice horizon when last classified.
    Golden,
    Future,
}

/// Store-assigned row id. Opaque: the column may be a uuid, text or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Number(i64),
    Text(String),
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Number(n) => write!(f, "{}", n),
            RowId::Text(s) => f.write_str(s),
        }
    }
}

impl From<Uuid> for RowId {
    fn from(id: Uuid) -> Self {
        RowId::Text(id.to_string())
    }
}

impl From<i64> for RowId {
    fn from(id: i64) -> Self {
        RowId::Number(id)
    }
}

impl From<&str> for RowId {
    fn from(id: &str) -> Self {
        RowId::Text(id.to_string())
    }
}

/// One observed appointment slot.
///
/// `appointment_time` is `None` for aggregated future dates where the portal
/// lists many times without exposing them individually.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: RowId,
    pub office: Office,
    pub appointment_type: String,
    pub appointment_date: NaiveDate,
    pub appointment_time: Option<NaiveTime>,
    pub slot_type: SlotType,
    pub is_golden: bool,
    #[serde(default)]
    pub is_current_closest: bool,
    pub available: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    #[serde(default)]
    pub book_url: String,
}

impl Appointment {
    /// Golden and still bookable.
    pub fn is_golden_available(&self) -> bool {
        self.is_golden && self.available
    }
}

/// One polling cycle of the scraper. `completed_at` stays empty while the run is in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeRun {
    pub id: RowId,
    pub run_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub offices_scraped: i32,
    #[serde(default)]
    pub golden_slots_found: i32,
    #[serde(default)]
    pub future_slots_found: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub email: String,
    pub active: bool,
}

/// Which rows the appointments table shows by availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AvailabilityFilter {
    #[default]
    AvailableOnly,
    GoneOnly,
    All,
}

impl AvailabilityFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        match self {
            AvailabilityFilter::AvailableOnly => appointment.available,
            AvailabilityFilter::GoneOnly => !appointment.available,
            AvailabilityFilter::All => true,
        }
    }
}

/// Supported table page sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PageSize {
    #[default]
    TwentyFive,
    Fifty,
    OneHundred,
}

impl PageSize {
    pub const ALL: [PageSize; 3] = [PageSize::TwentyFive, PageSize::Fifty, PageSize::OneHundred];

    pub fn get(&self) -> usize {
        match self {
            PageSize::TwentyFive => 25,
            PageSize::Fifty => 50,
            PageSize::OneHundred => 100,
        }
    }
}

impl TryFrom<usize> for PageSize {
    type Error = usize;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            25 => Ok(PageSize::TwentyFive),
            50 => Ok(PageSize::Fifty),
            100 => Ok(PageSize::OneHundred),
            other => Err(other),
        }
    }
}
