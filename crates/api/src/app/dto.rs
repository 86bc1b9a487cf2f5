use axum::http::StatusCode;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use storefront_infra::projections::ProductReadModel;
use storefront_products::{PricingMetadata, ProductId, PublishWindow, parse_timestamp};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    pub pricing: Option<PricingMetadata>,
    #[serde(default)]
    pub website_published: bool,
    #[serde(default)]
    pub expected_publish_date: Option<String>,
    #[serde(default)]
    pub expected_unpublish_date: Option<String>,
}

impl CreateProductRequest {
    pub fn window(&self) -> Result<PublishWindow, axum::response::Response> {
        parse_window(
            self.expected_publish_date.as_deref(),
            self.expected_unpublish_date.as_deref(),
        )
    }
}

/// Replaces both bounds; an omitted or null bound is cleared.
#[derive(Debug, Deserialize)]
pub struct ScheduleWindowRequest {
    #[serde(default)]
    pub expected_publish_date: Option<String>,
    #[serde(default)]
    pub expected_unpublish_date: Option<String>,
}

impl ScheduleWindowRequest {
    pub fn window(&self) -> Result<PublishWindow, axum::response::Response> {
        parse_window(
            self.expected_publish_date.as_deref(),
            self.expected_unpublish_date.as_deref(),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct SetRelatedRequest {
    pub related_product_ids: Vec<String>,
}

impl SetRelatedRequest {
    pub fn product_ids(&self) -> Result<Vec<ProductId>, axum::response::Response> {
        self.related_product_ids
            .iter()
            .map(|raw| raw.parse().map(ProductId::new).map_err(|_| errors::invalid_product_id()))
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ShopQuery {
    pub search: Option<String>,
    /// Kept raw so a junk value still renders the first page.
    pub page: Option<String>,
}

impl ShopQuery {
    pub fn page_number(&self) -> u32 {
        self.page
            .as_deref()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .unwrap_or(1)
            .max(1)
    }
}

/// Submitted bounds must parse; stored ones are read leniently elsewhere.
fn parse_window(
    publish: Option<&str>,
    unpublish: Option<&str>,
) -> Result<PublishWindow, axum::response::Response> {
    Ok(PublishWindow::new(
        parse_bound("expected_publish_date", publish)?,
        parse_bound("expected_unpublish_date", unpublish)?,
    ))
}

fn parse_bound(
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, axum::response::Response> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_timestamp(value).map(Some).ok_or_else(|| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("{field} must be an RFC 3339 timestamp"),
            )
        }),
    }
}

// -------------------------
// Response mapping
// -------------------------

fn timestamp_json(at: Option<DateTime<Utc>>) -> serde_json::Value {
    at.map_or(serde_json::Value::Null, |t| {
        serde_json::Value::String(t.to_rfc3339_opts(SecondsFormat::Secs, true))
    })
}

/// Back-office view: everything, including hidden products.
pub fn product_to_json(rm: &ProductReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.product_id.to_string(),
        "sku": rm.sku,
        "name": rm.name,
        "pricing": rm.pricing,
        "website_published": rm.website_published,
        "expected_publish_date": timestamp_json(rm.window.expected_publish_date),
        "expected_unpublish_date": timestamp_json(rm.window.expected_unpublish_date),
        "related_product_ids": rm.related_product_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        "version": rm.version,
    })
}

/// Storefront view: what a shopper may see.
pub fn storefront_product_to_json(rm: &ProductReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.product_id.to_string(),
        "sku": rm.sku,
        "name": rm.name,
        "url": product_path(rm.product_id),
        "price": rm.pricing.base_price,
        "currency": rm.pricing.currency,
    })
}

pub fn product_path(product_id: ProductId) -> String {
    format!("/shop/product/{product_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn shop_page_number_falls_back_to_first_page() {
        let page = |raw: Option<&str>| ShopQuery {
            search: None,
            page: raw.map(str::to_string),
        }
        .page_number();

        assert_eq!(page(None), 1);
        assert_eq!(page(Some("3")), 3);
        assert_eq!(page(Some("0")), 1);
        assert_eq!(page(Some("abc")), 1);
        assert_eq!(page(Some("-2")), 1);
    }

    #[test]
    fn window_bounds_parse_and_blank_means_absent() {
        let req = ScheduleWindowRequest {
            expected_publish_date: Some("2025-03-01T09:00:00Z".to_string()),
            expected_unpublish_date: Some("  ".to_string()),
        };
        let window = req.window().unwrap();

        assert_eq!(
            window.expected_publish_date,
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap())
        );
        assert_eq!(window.expected_unpublish_date, None);
    }

    #[test]
    fn unparseable_submitted_bound_is_rejected() {
        let req = ScheduleWindowRequest {
            expected_publish_date: None,
            expected_unpublish_date: Some("next tuesday".to_string()),
        };
        assert_eq!(req.window().unwrap_err().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn related_ids_must_be_uuids() {
        let ok = SetRelatedRequest {
            related_product_ids: vec![storefront_core::AggregateId::new().to_string()],
        };
        assert_eq!(ok.product_ids().unwrap().len(), 1);

        let bad = SetRelatedRequest {
            related_product_ids: vec!["sku-1".to_string()],
        };
        assert!(bad.product_ids().is_err());
    }
}
