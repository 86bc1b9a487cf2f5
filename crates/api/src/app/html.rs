//! Server-rendered storefront markup.
//!
//! Each product card carries `<meta itemprop="name" content="..."/>`, so the
//! presence of that tag is exactly "this product was listed".

use std::fmt::Write as _;

use storefront_infra::catalog::CatalogPage;
use storefront_infra::projections::ProductReadModel;

use crate::app::dto::product_path;

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn price(rm: &ProductReadModel) -> Option<String> {
    let cents = rm.pricing.base_price?;
    let currency = rm.pricing.currency.as_deref().unwrap_or("");
    Some(format!("{}.{:02} {}", cents / 100, cents % 100, escape(currency)).trim_end().to_string())
}

fn product_card(out: &mut String, rm: &ProductReadModel) {
    let name = escape(&rm.name);
    let _ = write!(
        out,
        r#"<div class="product" itemscope="itemscope" itemtype="http://schema.org/Product"><meta itemprop="name" content="{name}"/><a href="{href}">{name}</a> <span class="sku">{sku}</span>"#,
        href = product_path(rm.product_id),
        sku = escape(&rm.sku),
    );
    if let Some(p) = price(rm) {
        let _ = write!(out, r#" <span class="price">{p}</span>"#);
    }
    out.push_str("</div>\n");
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"/><title>{}</title></head><body>\n{body}</body></html>\n",
        escape(title),
    )
}

/// `/shop` listing. `page` is `None` when the catalog could not be read.
pub fn shop_page(search: Option<&str>, page: Option<&CatalogPage>, page_number: u32) -> String {
    let mut body = String::new();
    let _ = writeln!(
        body,
        r#"<form action="/shop" method="get"><input type="search" name="search" value="{}"/></form>"#,
        escape(search.unwrap_or_default()),
    );

    match page {
        Some(page) if !page.items.is_empty() => {
            body.push_str("<div class=\"products\">\n");
            for rm in &page.items {
                product_card(&mut body, rm);
            }
            body.push_str("</div>\n");

            let query = search
                .map(|s| format!("search={}&", urlencoding::encode(s)))
                .unwrap_or_default();
            if page_number > 1 {
                let _ = writeln!(body, r#"<a rel="prev" href="/shop?{query}page={}">Previous</a>"#, page_number - 1);
            }
            if page.has_more {
                let _ = writeln!(body, r#"<a rel="next" href="/shop?{query}page={}">Next</a>"#, page_number + 1);
            }
        }
        Some(_) => body.push_str("<p class=\"empty\">No products found.</p>\n"),
        None => body.push_str("<p class=\"empty\">The catalog is temporarily unavailable.</p>\n"),
    }

    layout("Shop", &body)
}

pub fn product_page(rm: &ProductReadModel) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "<h1>{}</h1>", escape(&rm.name));
    product_card(&mut body, rm);
    let _ = writeln!(
        body,
        r#"<div class="related" data-src="{}/related"></div>"#,
        product_path(rm.product_id),
    );
    layout(&rm.name, &body)
}

pub fn not_found_page() -> String {
    layout("Not found", "<h1>Product not found</h1>\n")
}

pub fn sitemap(base_url: &str, products: &[ProductReadModel]) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
    );
    let _ = writeln!(out, "<url><loc>{}/shop</loc></url>", escape(base_url));
    for rm in products {
        let _ = writeln!(
            out,
            "<url><loc>{}{}</loc></url>",
            escape(base_url),
            product_path(rm.product_id),
        );
    }
    out.push_str("</urlset>\n");
    out
}
