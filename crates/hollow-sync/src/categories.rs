//! Per-run cache of external taxonomy names.

use std::collections::HashMap;

use hollow_adapters::{ContentSource, FetchContext};
use hollow_core::ExternalCategory;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct CategoryResolver {
    names: HashMap<u64, String>,
    fell_back: bool,
}

/// Names a record resolved to, and the single theme label derived from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCategories {
    pub names: Vec<String>,
    pub theme: String,
}

impl CategoryResolver {
    pub fn from_categories(categories: impl IntoIterator<Item = ExternalCategory>) -> Self {
        let names = categories
            .into_iter()
            .filter_map(|c| {
                let name = c.name.trim().to_string();
                (!name.is_empty()).then_some((c.id, name))
            })
            .collect();
        Self {
            names,
            fell_back: false,
        }
    }

    /// Fetch the taxonomy once. A failed fetch is logged and leaves the map empty,
    /// so every record falls through to the default theme.
    pub async fn resolve(source: &dyn ContentSource, ctx: &FetchContext, per_page: u32) -> Self {
        match source.fetch_categories(ctx, per_page).await {
            Ok(categories) => {
                let resolver = Self::from_categories(categories);
                info!(categories = resolver.len(), "resolved feed categories");
                resolver
            }
            Err(err) => {
                warn!(error = %err, "category fetch failed; using default theme for this run");
                Self {
                    names: HashMap::new(),
                    fell_back: true,
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// True when the category fetch failed for this run.
    pub fn fell_back(&self) -> bool {
        self.fell_back
    }

    /// Names for the ids that resolve, in the record's order; unknown ids are dropped.
    pub fn lookup_names(&self, ids: &[u64]) -> Vec<String> {
        ids.iter()
            .filter_map(|id| self.names.get(id).cloned())
            .collect()
    }

    pub fn resolve_record(&self, ids: &[u64], default_theme: &str) -> ResolvedCategories {
        let names = self.lookup_names(ids);
        let theme = names
            .first()
            .cloned()
            .unwrap_or_else(|| default_theme.to_string());
        ResolvedCategories { names, theme }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> CategoryResolver {
        CategoryResolver::from_categories(vec![
            ExternalCategory {
                id: 3,
                name: "Ghost Stories".into(),
            },
            ExternalCategory {
                id: 5,
                name: "Cosmic Horror".into(),
            },
            ExternalCategory {
                id: 9,
                name: "  ".into(),
            },
        ])
    }

    #[test]
    fn unknown_ids_are_dropped_silently() {
        assert_eq!(
            resolver().lookup_names(&[99, 5, 3]),
            vec!["Cosmic Horror", "Ghost Stories"]
        );
        assert_eq!(resolver().len(), 2);
    }

    #[test]
    fn first_resolved_name_is_the_theme() {
        let resolved = resolver().resolve_record(&[99, 5, 3], "Horror");
        assert_eq!(resolved.theme, "Cosmic Horror");
    }

    #[test]
    fn unresolved_record_gets_default_theme() {
        let resolved = resolver().resolve_record(&[9, 42], "Horror");
        assert!(resolved.names.is_empty());
        assert_eq!(resolved.theme, "Horror");

        let empty = CategoryResolver::default().resolve_record(&[3], "Horror");
        assert_eq!(empty.theme, "Horror");
    }
}
