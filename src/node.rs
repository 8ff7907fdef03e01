//! Catalog nodes: the common capability shared by catalogs and leaves

use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::array::RemoteArraySource;
use crate::catalog::RemoteCatalog;
use crate::dispatch::ContainerDispatch;
use crate::error::{CatalogError, Result};
use crate::models::ItemRecord;
use crate::transport::SharedTransport;

/// Ordered path segments relative to the catalog root
pub type NodePath = Arc<[String]>;

/// Validate user-supplied path segments.
///
/// Segments are never split or joined on `/` by this crate; a segment that
/// contains one would silently address a different node.
pub fn node_path<I, S>(segments: I) -> Result<NodePath>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
    for segment in &segments {
        if segment.is_empty() {
            return Err(CatalogError::InvalidPath(
                "path segments must not be empty".to_string(),
            ));
        }
        if segment.contains('/') {
            return Err(CatalogError::InvalidPath(format!(
                "segment '{}' contains '/'; pass each level as its own segment",
                segment
            )));
        }
    }
    Ok(segments.into())
}

/// Read-only view of a node's metadata
///
/// Cloning is cheap and shares the underlying map. Only shared references
/// are ever handed out; [`Metadata::to_map`] returns an owned copy whose
/// mutation cannot reach the node.
#[derive(Clone, Default, PartialEq)]
pub struct Metadata(Arc<Map<String, Value>>);

impl Metadata {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(Arc::new(map))
    }

    /// Owned copy of the metadata
    pub fn to_map(&self) -> Map<String, Value> {
        self.0.as_ref().clone()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.to_map())
    }
}

impl Deref for Metadata {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self::new(map)
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}

/// Anything addressable in the catalog tree
pub trait CatalogNode {
    fn path(&self) -> &[String];

    fn metadata(&self) -> &Metadata;

    /// Last path segment; `None` at the root
    fn key(&self) -> Option<&str> {
        self.path().last().map(String::as_str)
    }
}

/// Client-side representation of a leaf, built through [`ContainerDispatch`]
pub trait DataSource: CatalogNode + Send + Sync + fmt::Debug {
    /// Container tag this source was constructed for
    fn container(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// Everything a node constructor receives from its parent
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub transport: SharedTransport,
    pub path: NodePath,
    pub metadata: Metadata,
    pub dispatch: Arc<ContainerDispatch>,
}

impl NodeContext {
    /// Context for the child described by `record` under `parent`
    ///
    /// Server-supplied ids become path segments, so an empty id or one
    /// containing `/` is a `MalformedResponse`.
    pub(crate) fn child(
        transport: &SharedTransport,
        parent: &[String],
        dispatch: &Arc<ContainerDispatch>,
        record: &ItemRecord,
    ) -> Result<Self> {
        let path = node_path(parent.iter().cloned().chain(std::iter::once(record.id.clone())))
            .map_err(|_| {
                CatalogError::MalformedResponse(format!(
                    "server listed an item with invalid id '{}'",
                    record.id
                ))
            })?;
        Ok(Self {
            transport: Arc::clone(transport),
            path,
            metadata: record
                .attributes
                .metadata
                .clone()
                .map(Metadata::new)
                .unwrap_or_default(),
            dispatch: Arc::clone(dispatch),
        })
    }
}

/// A child returned by catalog lookup or iteration
#[derive(Debug, Clone)]
pub enum Node {
    Catalog(RemoteCatalog),
    Source(Arc<dyn DataSource>),
}

impl Node {
    /// Construct the node for `record`: nested catalogs become catalogs,
    /// leaves go through the container dispatch table.
    pub(crate) fn from_record(
        transport: &SharedTransport,
        parent: &[String],
        dispatch: &Arc<ContainerDispatch>,
        record: ItemRecord,
    ) -> Result<Self> {
        let context = NodeContext::child(transport, parent, dispatch, &record)?;
        if record.is_catalog() {
            return Ok(Node::Catalog(RemoteCatalog::from_context(context)));
        }
        let container = record.attributes.container.ok_or_else(|| {
            CatalogError::MalformedResponse(format!(
                "item '{}' of type '{}' declares no container",
                record.id, record.kind
            ))
        })?;
        let source = dispatch.build(&container, context)?;
        Ok(Node::Source(source))
    }

    pub fn is_catalog(&self) -> bool {
        matches!(self, Node::Catalog(_))
    }

    pub fn as_catalog(&self) -> Option<&RemoteCatalog> {
        match self {
            Node::Catalog(catalog) => Some(catalog),
            Node::Source(_) => None,
        }
    }

    pub fn into_catalog(self) -> Option<RemoteCatalog> {
        match self {
            Node::Catalog(catalog) => Some(catalog),
            Node::Source(_) => None,
        }
    }

    pub fn as_source(&self) -> Option<&Arc<dyn DataSource>> {
        match self {
            Node::Source(source) => Some(source),
            Node::Catalog(_) => None,
        }
    }

    /// Downcast a leaf to a concrete source type
    pub fn downcast_ref<T: DataSource + 'static>(&self) -> Option<&T> {
        self.as_source()?.as_any().downcast_ref::<T>()
    }

    pub fn as_array(&self) -> Option<&RemoteArraySource> {
        self.downcast_ref::<RemoteArraySource>()
    }

    /// Container tag for leaves; `None` for catalogs
    pub fn container(&self) -> Option<&str> {
        self.as_source().map(|source| source.container())
    }
}

impl CatalogNode for Node {
    fn path(&self) -> &[String] {
        match self {
            Node::Catalog(catalog) => catalog.path(),
            Node::Source(source) => source.path(),
        }
    }

    fn metadata(&self) -> &Metadata {
        match self {
            Node::Catalog(catalog) => catalog.metadata(),
            Node::Source(source) => source.metadata(),
        }
    }
}
