//! Immutable, ordered list of review items loaded once at startup.

use std::io::Read;
use std::path::Path;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::CatalogError;

pub const COMPANY_NAME_COLUMN: &str = "company_name";
pub const WEBSITE_COLUMN: &str = "website";

/// One unit of review work. Identity is `index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub index: usize,
    pub company_name: String,
    pub website_url: String,
    /// Remaining source columns, in source order.
    pub extra_fields: Vec<(String, String)>,
}

impl Item {
    pub fn extra(&self, column: &str) -> Option<&str> {
        self.extra_fields
            .iter()
            .find(|(k, _)| k == column)
            .map(|(_, v)| v.as_str())
    }
}

/// Serialized as a flat record in source column order, the same shape the
/// row had in the source file.
impl Serialize for Item {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2 + self.extra_fields.len()))?;
        map.serialize_entry(COMPANY_NAME_COLUMN, &self.company_name)?;
        map.serialize_entry(WEBSITE_COLUMN, &self.website_url)?;
        for (k, v) in &self.extra_fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    items: Vec<Item>,
    extra_columns: Vec<String>,
}

impl ItemCatalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let catalog = Self::from_reader(file)?;
        tracing::info!(path = %path.display(), items = catalog.size(), "Catalog loaded");
        Ok(catalog)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let mut rdr = csv::ReaderBuilder::new().flexible(false).from_reader(reader);
        let headers: Vec<String> = rdr
            .headers()?
            .iter()
            .map(str::to_string)
            .collect();

        // Required columns match ignoring surrounding whitespace; extra
        // column names are kept verbatim.
        let position = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| CatalogError::MissingColumn(name.to_string()))
        };
        let name_col = position(COMPANY_NAME_COLUMN)?;
        let site_col = position(WEBSITE_COLUMN)?;

        let extra_columns: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != name_col && *i != site_col)
            .map(|(_, h)| h.clone())
            .collect();

        let mut items = Vec::new();
        for (index, record) in rdr.records().enumerate() {
            let record = record?;
            let field = |col: usize, column: &str| {
                let value = record.get(col).unwrap_or("").trim();
                if value.is_empty() {
                    Err(CatalogError::MissingField {
                        row: index + 1,
                        column: column.to_string(),
                    })
                } else {
                    Ok(value.to_string())
                }
            };
            let company_name = field(name_col, COMPANY_NAME_COLUMN)?;
            let website_url = field(site_col, WEBSITE_COLUMN)?;

            let extra_fields = headers
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != name_col && *i != site_col)
                .map(|(i, h)| (h.clone(), record.get(i).unwrap_or("").to_string()))
                .collect();

            items.push(Item {
                index,
                company_name,
                website_url,
                extra_fields,
            });
        }

        Ok(Self {
            items,
            extra_columns,
        })
    }

    /// Build a catalog from `(company_name, website)` pairs with no extra columns.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let items = pairs
            .into_iter()
            .enumerate()
            .map(|(index, (name, site))| Item {
                index,
                company_name: name.into(),
                website_url: site.into(),
                extra_fields: Vec::new(),
            })
            .collect();
        Self {
            items,
            extra_columns: Vec::new(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Non-required columns, in source order.
    pub fn extra_columns(&self) -> &[String] {
        &self.extra_columns
    }
}
