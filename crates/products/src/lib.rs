//! Products domain module (event-sourced).
//!
//! Business rules for the storefront catalog, implemented as deterministic
//! domain logic (no IO, no HTTP, no storage). [`visibility`] holds the rule
//! that decides whether a product is live on the storefront right now.

pub mod product;
pub mod visibility;

pub use product::{
    CreateProduct, PricingMetadata, Product, ProductCommand, ProductCreated, ProductEvent, ProductId,
    ProductPublished, ProductUnpublished, PublicationScheduled, PublishProduct, RelatedProductsSet,
    SchedulePublication, SetRelatedProducts, UnpublishProduct,
};
pub use visibility::{
    PublishWindow, Publishable, StorefrontVisibility, is_currently_visible, parse_timestamp,
};
