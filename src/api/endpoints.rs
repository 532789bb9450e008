//! Endpoint table of the catalog API.
//!
//! Reads are [`Endpoint`]s: they know their path, wire parameters, cache key
//! and the tags their result declares. Writes are [`Command`]s: they know their
//! method, path and the tags they invalidate.

use reqwest::Method;

use crate::cache::{CacheKey, QueryParams, Tag, TagSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `GET /categories`
    Categories,
    /// `GET /products?offset&limit`
    Products { offset: u32, limit: u32 },
    /// `GET /products/search?searchedText`
    Search { text: String },
    /// `GET /products?categoryId`
    ProductsByCategory { category_id: String },
    /// `GET /products/{slug}`
    Product { slug: String },
}

impl Endpoint {
    /// Endpoint identifier used as the first part of the cache key.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Categories => "categories",
            Self::Products { .. } | Self::ProductsByCategory { .. } => "products",
            Self::Search { .. } => "products/search",
            Self::Product { .. } => "product",
        }
    }

    pub fn segments(&self) -> Vec<String> {
        match self {
            Self::Categories => vec!["categories".into()],
            Self::Products { .. } | Self::ProductsByCategory { .. } => vec!["products".into()],
            Self::Search { .. } => vec!["products".into(), "search".into()],
            Self::Product { slug } => vec!["products".into(), slug.clone()],
        }
    }

    /// Query string parameters sent on the wire.
    pub fn params(&self) -> QueryParams {
        match self {
            Self::Categories | Self::Product { .. } => QueryParams::new(),
            Self::Products { offset, limit } => QueryParams::new()
                .with("offset", offset)
                .with("limit", limit),
            Self::Search { text } => QueryParams::new().with("searchedText", text),
            Self::ProductsByCategory { category_id } => {
                QueryParams::new().with("categoryId", category_id)
            }
        }
    }

    pub fn key(&self) -> CacheKey {
        match self {
            Self::Product { slug } => {
                CacheKey::new(self.id(), &QueryParams::new().with("slug", slug))
            }
            _ => CacheKey::new(self.id(), &self.params()),
        }
    }

    /// Tags declared by the entry this endpoint produces.
    pub fn tags(&self) -> TagSet {
        match self {
            Self::Categories => [Tag::category_list()].into_iter().collect(),
            Self::Products { .. } | Self::Search { .. } | Self::ProductsByCategory { .. } => {
                [Tag::product_list()].into_iter().collect()
            }
            Self::Product { slug } => [Tag::product_list(), Tag::product(slug)]
                .into_iter()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `POST /auth`
    Authenticate,
    /// `POST /products`
    CreateProduct,
    /// `PUT /products/{id}`
    UpdateProduct { id: String },
    /// `DELETE /products/{id}`
    DeleteProduct { id: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate => "authenticate",
            Self::CreateProduct => "create_product",
            Self::UpdateProduct { .. } => "update_product",
            Self::DeleteProduct { .. } => "delete_product",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Self::Authenticate | Self::CreateProduct => Method::POST,
            Self::UpdateProduct { .. } => Method::PUT,
            Self::DeleteProduct { .. } => Method::DELETE,
        }
    }

    pub fn segments(&self) -> Vec<String> {
        match self {
            Self::Authenticate => vec!["auth".into()],
            Self::CreateProduct => vec!["products".into()],
            Self::UpdateProduct { id } | Self::DeleteProduct { id } => {
                vec!["products".into(), id.clone()]
            }
        }
    }

    /// Tags made inconsistent once the command succeeds.
    pub fn invalidates(&self) -> Vec<Tag> {
        match self {
            Self::Authenticate => Vec::new(),
            Self::CreateProduct | Self::DeleteProduct { .. } => vec![Tag::product_list()],
            Self::UpdateProduct { id } => vec![Tag::product_list(), Tag::product(id)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_key_matches_parameter_order_independent_form() {
        let endpoint = Endpoint::Products {
            offset: 0,
            limit: 12,
        };
        let by_hand = CacheKey::new(
            "products",
            &QueryParams::new().with("limit", 12).with("offset", 0),
        );
        assert_eq!(endpoint.key(), by_hand);
        assert_eq!(endpoint.key().as_str(), "products?limit=12&offset=0");
    }

    #[test]
    fn category_filter_and_page_keys_differ() {
        let page = Endpoint::Products {
            offset: 0,
            limit: 12,
        };
        let category = Endpoint::ProductsByCategory {
            category_id: "3".into(),
        };
        assert_ne!(page.key(), category.key());
        assert_eq!(page.segments(), category.segments());
    }

    #[test]
    fn single_product_declares_slug_tag() {
        let endpoint = Endpoint::Product {
            slug: "desk-lamp".into(),
        };
        let tags = endpoint.tags();
        assert!(tags.contains(&Tag::product_list()));
        assert!(tags.contains(&Tag::product("desk-lamp")));
        assert_eq!(endpoint.segments(), ["products", "desk-lamp"]);
        assert!(endpoint.params().is_empty());
    }

    #[test]
    fn search_uses_searched_text_parameter() {
        let endpoint = Endpoint::Search {
            text: "lamp".into(),
        };
        assert_eq!(endpoint.params().get("searchedText"), Some("lamp"));
        assert_eq!(endpoint.segments(), ["products", "search"]);
    }

    #[test]
    fn commands_declare_invalidations() {
        assert!(Command::Authenticate.invalidates().is_empty());
        assert_eq!(Command::CreateProduct.invalidates(), [Tag::product_list()]);
        assert_eq!(
            Command::UpdateProduct { id: "5".into() }.invalidates(),
            [Tag::product_list(), Tag::product("5")]
        );
        assert_eq!(Command::DeleteProduct { id: "5".into() }.method(), Method::DELETE);
    }
}
