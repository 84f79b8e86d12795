//! Cache categories and their time-to-live table.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::CoachwayError;

/// Classification of a cached resource; selects its TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheCategory {
    Routes,
    Cities,
    Companies,
    Default,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 4] = [
        CacheCategory::Routes,
        CacheCategory::Cities,
        CacheCategory::Companies,
        CacheCategory::Default,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheCategory::Routes => "routes",
            CacheCategory::Cities => "cities",
            CacheCategory::Companies => "companies",
            CacheCategory::Default => "default",
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheCategory {
    type Err = CoachwayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "routes" => Ok(CacheCategory::Routes),
            "cities" => Ok(CacheCategory::Cities),
            "companies" => Ok(CacheCategory::Companies),
            "default" => Ok(CacheCategory::Default),
            other => Err(CoachwayError::InvalidInput(format!(
                "unknown cache category '{other}'"
            ))),
        }
    }
}

/// Per-category time-to-live.
///
/// Reference lists (cities, companies) change rarely and live long; route
/// listings change during the day and get a shorter window.
///
/// ```rust
/// # use coachway::{CacheCategory, TtlTable};
/// # use std::time::Duration;
/// let ttl = TtlTable::default().with(CacheCategory::Routes, Duration::from_secs(60));
/// assert_eq!(ttl.get(CacheCategory::Routes), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlTable {
    pub routes: Duration,
    pub cities: Duration,
    pub companies: Duration,
    pub default: Duration,
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            routes: Duration::from_secs(5 * 60),
            cities: Duration::from_secs(30 * 60),
            companies: Duration::from_secs(30 * 60),
            default: Duration::from_secs(2 * 60),
        }
    }
}

impl TtlTable {
    pub fn get(&self, category: CacheCategory) -> Duration {
        match category {
            CacheCategory::Routes => self.routes,
            CacheCategory::Cities => self.cities,
            CacheCategory::Companies => self.companies,
            CacheCategory::Default => self.default,
        }
    }

    /// Override the TTL of one category.
    pub fn with(mut self, category: CacheCategory, ttl: Duration) -> Self {
        match category {
            CacheCategory::Routes => self.routes = ttl,
            CacheCategory::Cities => self.cities = ttl,
            CacheCategory::Companies => self.companies = ttl,
            CacheCategory::Default => self.default = ttl,
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("Cities".parse::<CacheCategory>().unwrap(), CacheCategory::Cities);
        assert_eq!("routes".parse::<CacheCategory>().unwrap(), CacheCategory::Routes);
        assert!("buses".parse::<CacheCategory>().is_err());
    }

    #[test]
    fn category_display_matches_serde_name() {
        for category in CacheCategory::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{category}\""));
        }
    }

    #[test]
    fn reference_lists_outlive_routes() {
        let ttl = TtlTable::default();
        assert!(ttl.get(CacheCategory::Cities) > ttl.get(CacheCategory::Routes));
        assert!(ttl.get(CacheCategory::Companies) > ttl.get(CacheCategory::Routes));
        assert!(ttl.get(CacheCategory::Routes) > ttl.get(CacheCategory::Default));
    }
}
