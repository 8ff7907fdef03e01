//! Leaf node for chunked numeric arrays served over `/blob/array`

use std::any::Any;
use std::sync::Arc;
use tracing::{debug, warn};

use super::buffer::NumericArray;
use super::lazy::{BlockFetch, LazyArray};
use crate::error::{CatalogError, Result};
use crate::models::{DataType, Document, NodeRecord, StructureDescription};
use crate::node::{CatalogNode, DataSource, Metadata, NodeContext, NodePath};
use crate::transport::{Accept, Request, Route, SharedTransport};

/// Remote chunked array
///
/// The structure is re-fetched on every [`describe`](Self::describe) and
/// [`read`](Self::read) call, so a lazy array always reflects what the server
/// declared at the moment it was built.
#[derive(Debug, Clone)]
pub struct RemoteArraySource {
    transport: SharedTransport,
    path: NodePath,
    metadata: Metadata,
}

impl RemoteArraySource {
    /// Container tag served by this source
    pub const CONTAINER: &'static str = "array";

    pub fn new(context: NodeContext) -> Self {
        Self {
            transport: context.transport,
            path: context.path,
            metadata: context.metadata,
        }
    }

    /// Fetch the declared shape, dtype and chunk grid
    pub fn describe(&self) -> Result<StructureDescription> {
        let request = Request::new(Route::Metadata, &self.path).param("fields", "structure");
        let document: Document<NodeRecord> =
            self.transport.get(&request)?.error_for_status()?.json()?;
        document.data.attributes.structure.ok_or_else(|| {
            CatalogError::MalformedResponse(format!(
                "no structure declared for /{}",
                self.path.join("/")
            ))
        })
    }

    /// Build a lazy view over the array. No block is transferred.
    pub fn read(&self) -> Result<LazyArray> {
        let structure = self.describe()?;
        let fetcher = Arc::new(ArrayBlockFetcher {
            transport: Arc::clone(&self.transport),
            path: Arc::clone(&self.path),
        });
        LazyArray::new(self.graph_name(), structure, fetcher)
    }

    /// Fetch one block directly, bypassing the lazy array
    pub fn get_block(
        &self,
        block: &[usize],
        dtype: &DataType,
        shape: &[usize],
    ) -> Result<NumericArray> {
        fetch_block(&self.transport, &self.path, block, dtype, shape)
    }

    /// Stable task-graph name for this (server, path) pair
    ///
    /// Every field is length-prefixed, so no two distinct segment lists
    /// hash the same input.
    pub fn graph_name(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        let mut field = |bytes: &[u8]| {
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };
        field(self.transport.endpoint().as_bytes());
        for segment in self.path.iter() {
            field(segment.as_bytes());
        }
        let digest = hasher.finalize();
        format!("remote-array-{}", &digest.to_hex().as_str()[..16])
    }
}

impl CatalogNode for RemoteArraySource {
    fn path(&self) -> &[String] {
        &self.path
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl DataSource for RemoteArraySource {
    fn container(&self) -> &str {
        Self::CONTAINER
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Block materializer handed to [`LazyArray`]. Holds only the shared
/// transport and the path, so it may run on any executor thread.
#[derive(Debug)]
struct ArrayBlockFetcher {
    transport: SharedTransport,
    path: NodePath,
}

impl BlockFetch for ArrayBlockFetcher {
    fn fetch_block(
        &self,
        block: &[usize],
        dtype: &DataType,
        shape: &[usize],
    ) -> Result<NumericArray> {
        fetch_block(&self.transport, &self.path, block, dtype, shape)
    }
}

fn fetch_block(
    transport: &SharedTransport,
    path: &[String],
    block: &[usize],
    dtype: &DataType,
    shape: &[usize],
) -> Result<NumericArray> {
    let coordinate = block
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let request = Request::new(Route::ArrayBlob, path)
        .param("block", coordinate.as_str())
        .accept(Accept::OctetStream);
    let response = transport.get(&request)?.error_for_status()?;

    let expected = shape.iter().product::<usize>() * dtype.itemsize;
    let actual = response.body().len();
    if actual != expected {
        warn!(block = %coordinate, expected, actual, "block payload has wrong length");
        return Err(CatalogError::MalformedBlock {
            block: block.to_vec(),
            expected,
            actual,
        });
    }
    debug!(block = %coordinate, bytes = actual, "fetched block");
    NumericArray::decode(response.body(), dtype, shape)
}
