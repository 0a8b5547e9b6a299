use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

/// One callable upstream dataset, as declared in the catalog document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamInterface {
    pub name: String,
    pub description: String,
    /// Example call parameters, in presentation order.
    pub example_params: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogCategory {
    pub name: String,
    pub description: String,
    pub interfaces: Vec<UpstreamInterface>,
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    categories: Vec<CatalogCategory>,
}

/// The closed set of upstream interfaces this gateway brokers. Loaded once
/// at startup and read-only afterwards; only interface names listed here can
/// reach the upstream invoker.
pub struct Catalog {
    categories: Vec<CatalogCategory>,
    names: HashSet<String>,
}

impl Catalog {
    pub fn load(path: &Path) -> anyhow::Result<Catalog> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read catalog {}", path.display()))?;
        let document: CatalogDocument = serde_json::from_str(&raw)
            .with_context(|| format!("catalog {} is not valid", path.display()))?;
        let catalog = Catalog::from_categories(document.categories);
        info!(
            interfaces = catalog.names.len(),
            categories = catalog.categories.len(),
            "loaded upstream catalog"
        );
        Ok(catalog)
    }

    pub fn from_categories(categories: Vec<CatalogCategory>) -> Catalog {
        let names = categories
            .iter()
            .flat_map(|c| c.interfaces.iter())
            .map(|i| i.name.clone())
            .collect();
        Catalog { categories, names }
    }

    pub fn has(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Flattened interface list in catalog order; categories are only a
    /// grouping aid for the UI.
    pub fn list(&self) -> Vec<&UpstreamInterface> {
        self.categories
            .iter()
            .flat_map(|c| c.interfaces.iter())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Catalog {
        let doc: CatalogDocument = serde_json::from_value(json!({
            "categories": [
                {
                    "name": "股票",
                    "description": "A股行情",
                    "interfaces": [
                        {
                            "name": "stock_zh_a_hist",
                            "description": "A股历史行情",
                            "example_params": {"symbol": "600519", "period": "daily"}
                        }
                    ]
                },
                {
                    "name": "指数",
                    "description": "指数行情",
                    "interfaces": [
                        {
                            "name": "index_zh_a_hist",
                            "description": "指数历史行情",
                            "example_params": {"symbol": "000300"}
                        }
                    ]
                }
            ]
        }))
        .unwrap();
        Catalog::from_categories(doc.categories)
    }

    #[test]
    fn has_recognizes_declared_interfaces() {
        let catalog = sample();
        assert!(catalog.has("stock_zh_a_hist"));
        assert!(!catalog.has("stock_us_daily"));
    }

    #[test]
    fn list_flattens_in_catalog_order() {
        let names: Vec<_> = sample().list().iter().map(|i| i.name.clone()).collect();
        assert_eq!(names, vec!["stock_zh_a_hist", "index_zh_a_hist"]);
    }
}
