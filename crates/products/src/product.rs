use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, TenantId};
use storefront_events::Event;

use crate::visibility::{PublishWindow, Publishable};

/// Product identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Optional list price shown on the storefront.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingMetadata {
    pub base_price: Option<u64>, // smallest currency unit (e.g. cents)
    pub currency: Option<String>, // ISO 4217 code
}

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    tenant_id: Option<TenantId>,
    sku: String,
    name: String,
    pricing: PricingMetadata,
    website_published: bool,
    window: PublishWindow,
    related_product_ids: Vec<ProductId>,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            tenant_id: None,
            sku: String::new(),
            name: String::new(),
            pricing: PricingMetadata::default(),
            website_published: false,
            window: PublishWindow::unbounded(),
            related_product_ids: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pricing(&self) -> &PricingMetadata {
        &self.pricing
    }

    pub fn website_published(&self) -> bool {
        self.website_published
    }

    pub fn window(&self) -> PublishWindow {
        self.window
    }

    pub fn related_product_ids(&self) -> &[ProductId] {
        &self.related_product_ids
    }
}

impl Publishable for Product {
    fn is_published(&self) -> bool {
        self.created && self.website_published
    }

    fn publish_window(&self) -> PublishWindow {
        self.window
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub pricing: Option<PricingMetadata>,
    pub website_published: bool,
    pub window: PublishWindow,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PublishProduct (turn the website flag on).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UnpublishProduct (turn the website flag off).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpublishProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SchedulePublication.
///
/// Replaces both bounds; pass `PublishWindow::unbounded()` to clear them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePublication {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub window: PublishWindow,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetRelatedProducts (replaces the whole list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRelatedProducts {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub related_product_ids: Vec<ProductId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    PublishProduct(PublishProduct),
    UnpublishProduct(UnpublishProduct),
    SchedulePublication(SchedulePublication),
    SetRelatedProducts(SetRelatedProducts),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub pricing: PricingMetadata,
    #[serde(default)]
    pub website_published: bool,
    #[serde(default)]
    pub window: PublishWindow,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductPublished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPublished {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductUnpublished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUnpublished {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PublicationScheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationScheduled {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    #[serde(default)]
    pub window: PublishWindow,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RelatedProductsSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedProductsSet {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub related_product_ids: Vec<ProductId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    ProductPublished(ProductPublished),
    ProductUnpublished(ProductUnpublished),
    PublicationScheduled(PublicationScheduled),
    RelatedProductsSet(RelatedProductsSet),
}

impl ProductEvent {
    /// Tenant and product the event belongs to.
    pub fn scope(&self) -> (TenantId, ProductId) {
        match self {
            ProductEvent::ProductCreated(e) => (e.tenant_id, e.product_id),
            ProductEvent::ProductPublished(e) => (e.tenant_id, e.product_id),
            ProductEvent::ProductUnpublished(e) => (e.tenant_id, e.product_id),
            ProductEvent::PublicationScheduled(e) => (e.tenant_id, e.product_id),
            ProductEvent::RelatedProductsSet(e) => (e.tenant_id, e.product_id),
        }
    }
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "products.product.created",
            ProductEvent::ProductPublished(_) => "products.product.published",
            ProductEvent::ProductUnpublished(_) => "products.product.unpublished",
            ProductEvent::PublicationScheduled(_) => "products.product.publication_scheduled",
            ProductEvent::RelatedProductsSet(_) => "products.product.related_set",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::ProductPublished(e) => e.occurred_at,
            ProductEvent::ProductUnpublished(e) => e.occurred_at,
            ProductEvent::PublicationScheduled(e) => e.occurred_at,
            ProductEvent::RelatedProductsSet(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.tenant_id = Some(e.tenant_id);
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.pricing = e.pricing.clone();
                self.website_published = e.website_published;
                self.window = e.window;
                self.created = true;
            }
            ProductEvent::ProductPublished(_) => {
                self.website_published = true;
            }
            ProductEvent::ProductUnpublished(_) => {
                self.website_published = false;
            }
            ProductEvent::PublicationScheduled(e) => {
                self.window = e.window;
            }
            ProductEvent::RelatedProductsSet(e) => {
                self.related_product_ids = e.related_product_ids.clone();
            }
        }

        // +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::PublishProduct(cmd) => self.handle_publish(cmd),
            ProductCommand::UnpublishProduct(cmd) => self.handle_unpublish(cmd),
            ProductCommand::SchedulePublication(cmd) => self.handle_schedule(cmd),
            ProductCommand::SetRelatedProducts(cmd) => self.handle_set_related(cmd),
        }
    }
}

impl Product {
    fn ensure_existing(&self, tenant_id: TenantId, product_id: ProductId) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> DomainResult<Vec<ProductEvent>> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.sku.trim().is_empty() {
            return Err(DomainError::validation("SKU cannot be empty"));
        }

        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            sku: cmd.sku.trim().to_string(),
            name: cmd.name.trim().to_string(),
            pricing: cmd.pricing.clone().unwrap_or_default(),
            website_published: cmd.website_published,
            window: cmd.window,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_publish(&self, cmd: &PublishProduct) -> DomainResult<Vec<ProductEvent>> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;
        if self.website_published {
            return Err(DomainError::conflict("product is already published"));
        }

        Ok(vec![ProductEvent::ProductPublished(ProductPublished {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_unpublish(&self, cmd: &UnpublishProduct) -> DomainResult<Vec<ProductEvent>> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;
        if !self.website_published {
            return Err(DomainError::conflict("product is not published"));
        }

        Ok(vec![ProductEvent::ProductUnpublished(ProductUnpublished {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_schedule(&self, cmd: &SchedulePublication) -> DomainResult<Vec<ProductEvent>> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;

        // Inverted windows are accepted; they hide the product, they don't fail.
        if self.window == cmd.window {
            return Ok(vec![]);
        }

        Ok(vec![ProductEvent::PublicationScheduled(PublicationScheduled {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            window: cmd.window,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_related(&self, cmd: &SetRelatedProducts) -> DomainResult<Vec<ProductEvent>> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;

        if cmd.related_product_ids.contains(&cmd.product_id) {
            return Err(DomainError::validation("a product cannot be related to itself"));
        }

        let mut related: Vec<ProductId> = Vec::with_capacity(cmd.related_product_ids.len());
        for id in &cmd.related_product_ids {
            if !related.contains(id) {
                related.push(*id);
            }
        }

        if related == self.related_product_ids {
            return Ok(vec![]);
        }

        Ok(vec![ProductEvent::RelatedProductsSet(RelatedProductsSet {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            related_product_ids: related,
            occurred_at: cmd.occurred_at,
        })])
    }
}
