//! Storefront visibility: the website publish flag combined with an optional
//! publication window.
//!
//! Every storefront surface (shop search, product page, sitemap, related
//! products) decides inclusion through [`StorefrontVisibility`]. The SQL
//! rendering used by query-side catalogs lives next to the catalog backends
//! and mirrors [`is_currently_visible`] clause for clause.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{Clock, ValueObject};

/// Whether `now` falls inside the optional window `[publish_at, unpublish_at]`.
///
/// Each bound is optional and inclusive. A missing bound never restricts. An
/// inverted window (`publish_at > unpublish_at`) admits no instant at all.
pub fn is_currently_visible(
    now: DateTime<Utc>,
    publish_at: Option<DateTime<Utc>>,
    unpublish_at: Option<DateTime<Utc>>,
) -> bool {
    let lower = publish_at.is_none_or(|at| now >= at);
    let upper = unpublish_at.is_none_or(|at| now <= at);
    lower && upper
}

/// Publication window of a product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublishWindow {
    #[serde(default, deserialize_with = "lenient_timestamp::deserialize")]
    pub expected_publish_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp::deserialize")]
    pub expected_unpublish_date: Option<DateTime<Utc>>,
}

impl ValueObject for PublishWindow {}

impl PublishWindow {
    pub fn new(
        expected_publish_date: Option<DateTime<Utc>>,
        expected_unpublish_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            expected_publish_date,
            expected_unpublish_date,
        }
    }

    /// No bounds: visibility is governed by the publish flag alone.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self::new(Some(at), None)
    }

    pub fn ending_at(at: DateTime<Utc>) -> Self {
        Self::new(None, Some(at))
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        is_currently_visible(now, self.expected_publish_date, self.expected_unpublish_date)
    }

    pub fn is_unbounded(&self) -> bool {
        self.expected_publish_date.is_none() && self.expected_unpublish_date.is_none()
    }

    /// Both bounds set and the publish date after the unpublish date.
    pub fn is_inverted(&self) -> bool {
        matches!(
            (self.expected_publish_date, self.expected_unpublish_date),
            (Some(from), Some(until)) if from > until
        )
    }
}

/// Anything the storefront can decide to show or hide.
///
/// Implemented by the `Product` aggregate and by catalog read models, so the
/// same rule runs against write-side state and query results.
pub trait Publishable {
    /// The pre-existing "published on website" flag.
    fn is_published(&self) -> bool;

    fn publish_window(&self) -> PublishWindow;
}

impl<P: Publishable + ?Sized> Publishable for &P {
    fn is_published(&self) -> bool {
        (**self).is_published()
    }

    fn publish_window(&self) -> PublishWindow {
        (**self).publish_window()
    }
}

/// The storefront filter: `published AND window contains now`, evaluated
/// against one `now` snapshot.
///
/// Build one per request and pass it by reference to every listing, so no
/// product flickers across a boundary instant while a page is being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorefrontVisibility {
    now: DateTime<Utc>,
}

impl StorefrontVisibility {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// Read the clock once and freeze the result.
    pub fn snapshot<C: Clock + ?Sized>(clock: &C) -> Self {
        Self::at(clock.now())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn admits<P: Publishable + ?Sized>(&self, product: &P) -> bool {
        product.is_published() && product.publish_window().contains(self.now)
    }

    /// Row-side filtering for candidate sets already in memory.
    pub fn retain<P: Publishable>(&self, products: impl IntoIterator<Item = P>) -> Vec<P> {
        products.into_iter().filter(|p| self.admits(p)).collect()
    }
}

/// Parse a stored or submitted timestamp.
///
/// Accepts RFC 3339 (`2025-03-01T09:00:00Z`, any offset) and the naive
/// `YYYY-MM-DD HH:MM:SS` form, read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Fail-open decoding for window bounds.
///
/// A bound that cannot be read is treated as absent (logged at `warn`); the
/// rest of the payload still decodes.
pub mod lenient_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        UnixSeconds(i64),
        Other(serde::de::IgnoredAny),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Raw>::deserialize(deserializer)?;
        Ok(match raw {
            None => None,
            Some(Raw::Text(text)) => {
                let parsed = super::parse_timestamp(&text);
                if parsed.is_none() && !text.trim().is_empty() {
                    tracing::warn!(value = %text, "unreadable publication bound, treating as absent");
                }
                parsed
            }
            Some(Raw::UnixSeconds(secs)) => {
                let parsed = DateTime::from_timestamp(secs, 0);
                if parsed.is_none() {
                    tracing::warn!(value = secs, "out-of-range publication bound, treating as absent");
                }
                parsed
            }
            Some(Raw::Other(_)) => {
                tracing::warn!("publication bound has unexpected type, treating as absent");
                None
            }
        })
    }
}
