//! Wire records exchanged with the catalog server
//!
//! JSON documents follow a `{data, links, meta}` envelope. Only the fields
//! this client reads are modelled; unknown fields are ignored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::array::ElementType;
use crate::error::{CatalogError, Result};

/// Item `type` that marks a nested catalog
pub const CATALOG_TYPE: &str = "catalog";

/// Item `type` used by the server for leaves
pub const DATA_SOURCE_TYPE: &str = "data_source";

/// `{data: ...}` document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document<T> {
    pub data: T,
}

/// One page of a `/search` listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub data: Vec<ItemRecord>,
    #[serde(default)]
    pub links: PageLinks,
    #[serde(default)]
    pub meta: PageMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageLinks {
    /// Link to the following page; `None` once the listing is exhausted
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageMeta {
    #[serde(default)]
    pub count: Option<usize>,
}

/// A child entry in a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: ItemAttributes,
}

impl ItemRecord {
    pub fn is_catalog(&self) -> bool {
        self.kind == CATALOG_TYPE
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

/// `/metadata/{path}` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub attributes: NodeAttributes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<StructureDescription>,
}

/// Declared layout of a chunked array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureDescription {
    /// Extent of each dimension
    pub shape: Vec<usize>,
    pub dtype: DataType,
    /// Block extents along each dimension (an irregular chunk grid)
    pub chunks: Vec<Vec<usize>>,
}

impl StructureDescription {
    /// Check that the chunk grid tiles `shape` exactly.
    ///
    /// The server's structure is otherwise trusted; this only guards the
    /// arithmetic that block addressing relies on.
    pub fn check_grid(&self) -> Result<()> {
        if self.chunks.len() != self.shape.len() {
            return Err(CatalogError::MalformedResponse(format!(
                "chunk grid has {} dimensions but shape has {}",
                self.chunks.len(),
                self.shape.len()
            )));
        }
        for (dim, (extent, chunks)) in self.shape.iter().zip(&self.chunks).enumerate() {
            let covered: usize = chunks.iter().sum();
            if covered != *extent {
                return Err(CatalogError::MalformedResponse(format!(
                    "chunks along dimension {} cover {} elements, shape declares {}",
                    dim, covered, extent
                )));
            }
        }
        Ok(())
    }

    /// Number of blocks along each dimension
    pub fn block_counts(&self) -> Vec<usize> {
        self.chunks.iter().map(Vec::len).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    Little,
    Big,
    NotApplicable,
}

/// Machine data type descriptor (`kind` follows the numpy type codes)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataType {
    pub endianness: Endianness,
    pub kind: String,
    pub itemsize: usize,
}

impl DataType {
    /// Little-endian descriptor for `element`
    pub fn from_element(element: ElementType) -> Self {
        let endianness = if element.size() == 1 {
            Endianness::NotApplicable
        } else {
            Endianness::Little
        };
        Self {
            endianness,
            kind: element.kind_code().to_string(),
            itemsize: element.size(),
        }
    }

    /// Concrete element type this descriptor names
    pub fn element_type(&self) -> Result<ElementType> {
        let element = match (self.kind.as_str(), self.itemsize) {
            ("b", 1) => ElementType::Bool,
            ("i", 1) => ElementType::I8,
            ("i", 2) => ElementType::I16,
            ("i", 4) => ElementType::I32,
            ("i", 8) => ElementType::I64,
            ("u", 1) => ElementType::U8,
            ("u", 2) => ElementType::U16,
            ("u", 4) => ElementType::U32,
            ("u", 8) => ElementType::U64,
            ("f", 4) => ElementType::F32,
            ("f", 8) => ElementType::F64,
            (kind, size) => {
                return Err(CatalogError::UnsupportedDtype(format!(
                    "kind '{}' with itemsize {}",
                    kind, size
                )))
            }
        };
        Ok(element)
    }
}
