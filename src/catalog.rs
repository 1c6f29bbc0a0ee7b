use std::{collections::HashMap, path::Path};

use tracing::info;

use crate::{error::CatalogError, types::Product};

/// Read-only price table keyed by lowercased (type, size).
#[derive(Debug, Clone, Default)]
pub struct ProductCatalog {
    by_key: HashMap<(String, String), Product>,
}

impl ProductCatalog {
    pub fn from_products(products: impl IntoIterator<Item = Product>) -> Self {
        let by_key = products
            .into_iter()
            .map(|p| (catalog_key(&p.product_type, &p.size), p))
            .collect();
        Self { by_key }
    }

    /// Loads a JSON array of `{product_type, size, price}` rows.
    pub async fn load_json(path: &Path) -> Result<Self, CatalogError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|source| CatalogError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let products =
            serde_json::from_slice::<Vec<Product>>(&raw).map_err(|source| CatalogError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        let catalog = Self::from_products(products);
        info!(path = %path.display(), products = catalog.len(), "loaded product table");
        Ok(catalog)
    }

    pub fn find(&self, product_type: &str, size: &str) -> Option<&Product> {
        self.by_key.get(&catalog_key(product_type, size))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

fn catalog_key(product_type: &str, size: &str) -> (String, String) {
    (
        product_type.trim().to_lowercase(),
        size.trim().to_lowercase(),
    )
}
