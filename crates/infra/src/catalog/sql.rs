//! SQL rendering of the storefront visibility rule.
//!
//! Statements target `storefront_products` with a fixed parameter layout:
//! `$1` tenant, `$2` the request's `now`, then statement-specific parameters.
//! `now` is bound once and referenced by both bounds.

use crate::read_model::postgres::PRODUCT_COLUMNS;

/// Parameter index of the tenant id.
pub const TENANT_PARAM: usize = 1;
/// Parameter index of the `now` snapshot.
pub const NOW_PARAM: usize = 2;

/// `published AND window contains $now`, with both bounds inclusive and
/// NULL meaning unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityClause {
    now_param: usize,
}

impl VisibilityClause {
    pub fn new(now_param: usize) -> Self {
        Self { now_param }
    }

    pub fn now_param(&self) -> usize {
        self.now_param
    }

    pub fn render(&self) -> String {
        let n = self.now_param;
        format!(
            "website_published \
             AND (expected_publish_date IS NULL OR expected_publish_date <= ${n}) \
             AND (expected_unpublish_date IS NULL OR expected_unpublish_date >= ${n})"
        )
    }
}

impl Default for VisibilityClause {
    fn default() -> Self {
        Self::new(NOW_PARAM)
    }
}

/// Byte-order sort, matching the row-side backend regardless of the
/// database's default collation.
pub const LISTING_ORDER: &str = r#"name COLLATE "C", sku COLLATE "C", product_id"#;

fn visible_rows_where() -> String {
    format!("tenant_id = ${TENANT_PARAM} AND {}", VisibilityClause::default().render())
}

/// Search statements for `terms` words: patterns bind at `$3..`, followed by
/// limit and offset on the page statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchStatements {
    pub page: String,
    pub count: String,
}

pub fn search_statements(terms: usize) -> SearchStatements {
    let mut filter = visible_rows_where();
    for i in 0..terms {
        let p = NOW_PARAM + 1 + i;
        filter.push_str(&format!(" AND (name ILIKE ${p} OR sku ILIKE ${p})"));
    }

    let limit = NOW_PARAM + 1 + terms;
    let offset = limit + 1;

    SearchStatements {
        page: format!(
            "SELECT {PRODUCT_COLUMNS} FROM storefront_products WHERE {filter} \
             ORDER BY {LISTING_ORDER} LIMIT ${limit} OFFSET ${offset}"
        ),
        count: format!("SELECT COUNT(*) FROM storefront_products WHERE {filter}"),
    }
}

/// One visible product; `$3` is the product id.
pub fn visible_product_statement() -> String {
    format!(
        "SELECT {PRODUCT_COLUMNS} FROM storefront_products WHERE {} AND product_id = $3",
        visible_rows_where()
    )
}

/// All visible products of the tenant, by name.
pub fn all_visible_statement() -> String {
    format!(
        "SELECT {PRODUCT_COLUMNS} FROM storefront_products WHERE {} ORDER BY {LISTING_ORDER}",
        visible_rows_where()
    )
}

/// Unfiltered lookup; `$2` is a UUID array.
pub fn products_by_ids_statement() -> String {
    format!(
        "SELECT {PRODUCT_COLUMNS} FROM storefront_products \
         WHERE tenant_id = ${TENANT_PARAM} AND product_id = ANY($2)"
    )
}

/// `%term%` for ILIKE, with the pattern metacharacters escaped.
pub fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_clause_binds_now_for_both_bounds() {
        let sql = VisibilityClause::new(7).render();
        assert_eq!(
            sql,
            "website_published \
             AND (expected_publish_date IS NULL OR expected_publish_date <= $7) \
             AND (expected_unpublish_date IS NULL OR expected_unpublish_date >= $7)"
        );
        assert_eq!(sql.matches("$7").count(), 2);
    }

    #[test]
    fn search_without_terms_pages_visible_rows() {
        let s = search_statements(0);
        assert!(s.page.contains("tenant_id = $1 AND website_published"));
        assert!(s.page.ends_with(r#"ORDER BY name COLLATE "C", sku COLLATE "C", product_id LIMIT $3 OFFSET $4"#));
        assert!(!s.count.contains("LIMIT"));
        assert!(s.count.starts_with("SELECT COUNT(*) FROM storefront_products WHERE"));
    }

    #[test]
    fn search_terms_take_consecutive_parameters() {
        let s = search_statements(2);
        assert!(s.page.contains("(name ILIKE $3 OR sku ILIKE $3)"));
        assert!(s.page.contains("(name ILIKE $4 OR sku ILIKE $4)"));
        assert!(s.page.ends_with("LIMIT $5 OFFSET $6"));
        assert!(s.count.contains("(name ILIKE $4 OR sku ILIKE $4)"));
    }

    #[test]
    fn every_storefront_statement_carries_the_clause() {
        let clause = VisibilityClause::default().render();
        for sql in [
            search_statements(1).page,
            search_statements(1).count,
            visible_product_statement(),
            all_visible_statement(),
        ] {
            assert!(sql.contains(&clause), "missing visibility clause: {sql}");
        }
        assert!(!products_by_ids_statement().contains(&clause));
    }

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("test"), "%test%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }
}
