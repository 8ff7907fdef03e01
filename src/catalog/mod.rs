/*!
 * Remote catalogs: lazy, paginated, read-only mappings
 *
 * A [`RemoteCatalog`] maps string keys to child [`Node`]s (nested catalogs or
 * leaves) listed by the server's `/search` endpoint. Nothing is cached: every
 * operation issues the requests it needs, so results always reflect the
 * server at call time.
 *
 * Catalogs are immutable. [`RemoteCatalog::search`] returns a new catalog
 * whose query tuple is the receiver's plus one; navigating into a child
 * starts that child with no queries.
 *
 * # Example
 *
 * ```no_run
 * use orbit_catalog::{Query, RemoteCatalog};
 *
 * let catalog = RemoteCatalog::from_uri("http://localhost:8000")?;
 * for key in catalog.search(Query::full_text("ocean")).keys() {
 *     println!("{}", key?);
 * }
 * # Ok::<(), orbit_catalog::CatalogError>(())
 * ```
 */

mod indexer;
mod pages;

pub use indexer::{Indexer, Selection};
pub use pages::{Items, Keys, Values};

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::dispatch::ContainerDispatch;
use crate::error::{CatalogError, Result};
use crate::models::{Document, ItemRecord, NodeRecord, Page};
use crate::node::{node_path, CatalogNode, Metadata, Node, NodeContext, NodePath};
use crate::query::{queries_to_params, Query};
use crate::transport::{HttpTransport, Request, Route, SharedTransport};
use pages::{fetch_page, PageWalker, Records};

/// `fields` values requested when children must be constructed
const ITEM_FIELDS: [&str; 2] = ["metadata", "container"];

/// Read-only mapping operations implemented directly against the paging
/// protocol. Positional access and slices go to the server as offsets; they
/// are never derived from full iteration.
pub trait Mapping {
    type Value;

    /// Number of entries in the current view
    fn length(&self) -> Result<usize>;

    /// Entry for `key`; [`CatalogError::KeyNotFound`] when absent
    fn lookup(&self, key: &str) -> Result<Self::Value>;

    fn iter_keys(&self) -> Box<dyn Iterator<Item = Result<String>> + '_>;

    fn iter_items(&self) -> Box<dyn Iterator<Item = Result<(String, Self::Value)>> + '_>;

    fn index_by_position(&self, index: usize) -> Result<(String, Self::Value)>;

    fn slice(
        &self,
        start: usize,
        stop: Option<usize>,
    ) -> Box<dyn Iterator<Item = Result<(String, Self::Value)>> + '_>;
}

/// A catalog level on a remote server, scoped by an immutable query tuple
#[derive(Debug, Clone)]
pub struct RemoteCatalog {
    transport: SharedTransport,
    path: NodePath,
    metadata: Metadata,
    dispatch: Arc<ContainerDispatch>,
    queries: Arc<[Query]>,
    query_params: Arc<[(String, String)]>,
}

impl RemoteCatalog {
    /// Root catalog: one bootstrap `GET /metadata/`
    pub fn connect(transport: SharedTransport, dispatch: ContainerDispatch) -> Result<Self> {
        let request = Request::new(Route::Metadata, &[]);
        let document: Document<NodeRecord> =
            transport.get(&request)?.error_for_status()?.json()?;
        let metadata = document
            .data
            .attributes
            .metadata
            .map(Metadata::new)
            .unwrap_or_default();

        info!(
            endpoint = transport.endpoint(),
            containers = ?dispatch.containers(),
            "connected to catalog"
        );
        Ok(Self::from_context(NodeContext {
            transport,
            path: NodePath::from(Vec::new()),
            metadata,
            dispatch: Arc::new(dispatch),
        }))
    }

    /// Connect over HTTP with default settings and the default dispatch table
    pub fn from_uri(uri: &str) -> Result<Self> {
        let transport = HttpTransport::new(uri)?;
        Self::connect(Arc::new(transport), ContainerDispatch::new())
    }

    pub fn from_config(config: &ClientConfig, dispatch: ContainerDispatch) -> Result<Self> {
        let transport = HttpTransport::from_config(config)?;
        Self::connect(Arc::new(transport), dispatch)
    }

    /// Catalog at an explicit path, without a bootstrap request
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::InvalidPath` if a segment is empty or contains `/`.
    pub fn new<I, S>(
        transport: SharedTransport,
        path: I,
        metadata: Metadata,
        dispatch: Arc<ContainerDispatch>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self::from_context(NodeContext {
            transport,
            path: node_path(path)?,
            metadata,
            dispatch,
        }))
    }

    pub(crate) fn from_context(context: NodeContext) -> Self {
        Self {
            transport: context.transport,
            path: context.path,
            metadata: context.metadata,
            dispatch: context.dispatch,
            queries: Arc::from(Vec::new()),
            query_params: Arc::from(Vec::new()),
        }
    }

    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    pub fn dispatch(&self) -> &ContainerDispatch {
        &self.dispatch
    }

    /// New catalog over the same path with `query` appended
    pub fn search(&self, query: Query) -> Self {
        let queries: Vec<Query> = self.queries.iter().cloned().chain([query]).collect();
        let query_params = queries_to_params(&queries);
        Self {
            transport: Arc::clone(&self.transport),
            path: Arc::clone(&self.path),
            metadata: self.metadata.clone(),
            dispatch: Arc::clone(&self.dispatch),
            queries: queries.into(),
            query_params: query_params.into(),
        }
    }

    /// Server-reported count for this (path, queries) view. Not cached.
    pub fn len(&self) -> Result<usize> {
        let request = self
            .search_request()
            .params(key_fields())
            .params(self.query_params.iter().cloned());
        let page = fetch_page(self.transport.as_ref(), &request)?;
        page.meta.count.ok_or_else(|| {
            CatalogError::MalformedResponse(format!(
                "listing of {} carries no meta.count",
                self.display_path()
            ))
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Every key, one page per request
    pub fn keys(&self) -> Keys {
        Keys::new(self.records(key_fields(), None, None))
    }

    /// Every `(key, node)` pair; children are built from the listing itself
    pub fn items(&self) -> Items {
        self.items_from(self.records(item_fields(), None, None))
    }

    pub fn values(&self) -> Values {
        Values::new(self.items())
    }

    /// Child for `key`, `None` if the view has no such entry
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::DuplicateKey` if the server reports more than one
    /// match, and `CatalogError::UnknownContainer` if the child's container has
    /// no dispatch entry.
    pub fn get(&self, key: &str) -> Result<Option<Node>> {
        let lookup = [Query::key_lookup(key)];
        let request = Request::new(Route::Search, &self.path)
            .params(item_fields())
            .params(queries_to_params(&lookup))
            .params(self.query_params.iter().cloned());
        let mut page = fetch_page(self.transport.as_ref(), &request)?;

        match page.data.len() {
            0 => {
                debug!(key, path = %self.display_path(), "key not found");
                Ok(None)
            }
            1 => {
                let record = page.data.remove(0);
                Node::from_record(&self.transport, &self.path, &self.dispatch, record).map(Some)
            }
            matches => {
                warn!(
                    key,
                    matches,
                    path = %self.display_path(),
                    "key lookup matched several items"
                );
                Err(CatalogError::DuplicateKey {
                    key: key.to_string(),
                    matches,
                })
            }
        }
    }

    /// Like [`get`](Self::get) but a missing key is `CatalogError::KeyNotFound`
    pub fn lookup(&self, key: &str) -> Result<Node> {
        self.get(key)?
            .ok_or_else(|| CatalogError::KeyNotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Walk several levels down. An empty path yields this catalog.
    pub fn get_path<S: AsRef<str>>(&self, segments: &[S]) -> Result<Node> {
        let mut node = Node::Catalog(self.clone());
        for (depth, segment) in segments.iter().enumerate() {
            let catalog = node.into_catalog().ok_or_else(|| {
                CatalogError::InvalidPath(format!(
                    "'{}' is not a catalog",
                    segments[..depth]
                        .iter()
                        .map(AsRef::as_ref)
                        .collect::<Vec<_>>()
                        .join("/")
                ))
            })?;
            node = catalog.lookup(segment.as_ref())?;
        }
        Ok(node)
    }

    /// Key at `index`
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::IndexOutOfRange` if `index >= len()`.
    pub fn key_at(&self, index: usize) -> Result<String> {
        self.record_at(index, key_fields()).map(|record| record.id)
    }

    pub fn item_at(&self, index: usize) -> Result<(String, Node)> {
        let record = self.record_at(index, item_fields())?;
        let key = record.id.clone();
        let node = Node::from_record(&self.transport, &self.path, &self.dispatch, record)?;
        Ok((key, node))
    }

    pub fn value_at(&self, index: usize) -> Result<Node> {
        self.item_at(index).map(|(_, node)| node)
    }

    /// Keys in `[start, stop)`; no page is requested past `stop`
    pub fn keys_slice(&self, start: usize, stop: Option<usize>) -> Keys {
        Keys::new(self.records(key_fields(), Some(start), stop))
    }

    pub fn items_slice(&self, start: usize, stop: Option<usize>) -> Items {
        self.items_from(self.records(item_fields(), Some(start), stop))
    }

    pub fn values_slice(&self, start: usize, stop: Option<usize>) -> Values {
        Values::new(self.items_slice(start, stop))
    }

    pub fn keys_index(&self, indexer: impl Into<Indexer>) -> Result<Selection<String>> {
        match indexer.into() {
            Indexer::Position(index) => self.key_at(index).map(Selection::One),
            Indexer::Slice { start, stop } => self
                .keys_slice(start, stop)
                .collect::<Result<Vec<_>>>()
                .map(Selection::Many),
        }
    }

    pub fn items_index(&self, indexer: impl Into<Indexer>) -> Result<Selection<(String, Node)>> {
        match indexer.into() {
            Indexer::Position(index) => self.item_at(index).map(Selection::One),
            Indexer::Slice { start, stop } => self
                .items_slice(start, stop)
                .collect::<Result<Vec<_>>>()
                .map(Selection::Many),
        }
    }

    pub fn values_index(&self, indexer: impl Into<Indexer>) -> Result<Selection<Node>> {
        match indexer.into() {
            Indexer::Position(index) => self.value_at(index).map(Selection::One),
            Indexer::Slice { start, stop } => self
                .values_slice(start, stop)
                .collect::<Result<Vec<_>>>()
                .map(Selection::Many),
        }
    }

    fn search_request(&self) -> Request {
        Request::new(Route::Search, &self.path)
    }

    fn display_path(&self) -> String {
        format!("/{}", self.path.join("/"))
    }

    /// Record walk with `fields` and the active filters carried on every page
    fn records(
        &self,
        fields: Vec<(String, String)>,
        start: Option<usize>,
        stop: Option<usize>,
    ) -> Records {
        let carry: Vec<(String, String)> = fields
            .into_iter()
            .chain(self.query_params.iter().cloned())
            .collect();
        let mut first = self.search_request().params(carry.iter().cloned());
        if let Some(start) = start {
            first = first.param("page[offset]", start.to_string());
        }
        let limit = stop.map(|stop| stop.saturating_sub(start.unwrap_or(0)));
        Records::new(
            PageWalker::new(Arc::clone(&self.transport), first, carry),
            limit,
        )
    }

    fn items_from(&self, records: Records) -> Items {
        Items::new(
            records,
            Arc::clone(&self.transport),
            Arc::clone(&self.path),
            Arc::clone(&self.dispatch),
        )
    }

    fn record_at(
        &self,
        index: usize,
        fields: Vec<(String, String)>,
    ) -> Result<ItemRecord> {
        let len = self.len()?;
        if index >= len {
            return Err(CatalogError::IndexOutOfRange { index, len });
        }
        let request = self
            .search_request()
            .params(fields)
            .params(self.query_params.iter().cloned())
            .param("page[offset]", index.to_string())
            .param("page[limit]", "1");
        let page: Page = fetch_page(self.transport.as_ref(), &request)?;
        let mut data = page.data;
        match data.len() {
            1 => Ok(data.remove(0)),
            // The listing shrank between the length check and the fetch
            0 => Err(CatalogError::IndexOutOfRange { index, len }),
            n => Err(CatalogError::MalformedResponse(format!(
                "page[limit]=1 returned {} items",
                n
            ))),
        }
    }
}

fn key_fields() -> Vec<(String, String)> {
    vec![("fields".to_string(), String::new())]
}

fn item_fields() -> Vec<(String, String)> {
    ITEM_FIELDS
        .iter()
        .map(|field| ("fields".to_string(), field.to_string()))
        .collect()
}

impl CatalogNode for RemoteCatalog {
    fn path(&self) -> &[String] {
        &self.path
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl Mapping for RemoteCatalog {
    type Value = Node;

    fn length(&self) -> Result<usize> {
        self.len()
    }

    fn lookup(&self, key: &str) -> Result<Node> {
        RemoteCatalog::lookup(self, key)
    }

    fn iter_keys(&self) -> Box<dyn Iterator<Item = Result<String>> + '_> {
        Box::new(self.keys())
    }

    fn iter_items(&self) -> Box<dyn Iterator<Item = Result<(String, Node)>> + '_> {
        Box::new(self.items())
    }

    fn index_by_position(&self, index: usize) -> Result<(String, Node)> {
        self.item_at(index)
    }

    fn slice(
        &self,
        start: usize,
        stop: Option<usize>,
    ) -> Box<dyn Iterator<Item = Result<(String, Node)>> + '_> {
        Box::new(self.items_slice(start, stop))
    }
}

/// Never paginates: shows the endpoint, path and active queries only
impl fmt::Display for RemoteCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<RemoteCatalog {}{}",
            self.transport.endpoint().trim_end_matches('/'),
            self.display_path()
        )?;
        if !self.queries.is_empty() {
            let queries: Vec<String> = self.queries.iter().map(Query::to_string).collect();
            write!(f, " [{}]", queries.join(", "))?;
        }
        write!(f, ">")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockServer;
    use serde_json::{json, Map};

    fn catalog(server: &MockServer) -> RemoteCatalog {
        crate::logging::init_test_logging();
        RemoteCatalog::connect(Arc::new(server.clone()), ContainerDispatch::new()).unwrap()
    }

    fn sample() -> MockServer {
        let server = MockServer::new().with_page_size(2);
        let mut root = Map::new();
        root.insert("title".to_string(), json!("sample"));
        server.set_root_metadata(root);
        for key in ["a", "b", "c"] {
            server.add_leaf(key, "array", Map::new());
        }
        server.add_catalog("nested", Map::new());
        server
    }

    #[test]
    fn test_connect_reads_root_metadata() {
        let server = sample();
        let cat = catalog(&server);
        assert!(cat.path().is_empty());
        assert_eq!(cat.metadata().get("title"), Some(&json!("sample")));
        assert_eq!(server.requests()[0].route, Route::Metadata);
    }

    #[test]
    fn test_new_rejects_delimited_path() {
        let server = sample();
        let result = RemoteCatalog::new(
            Arc::new(server),
            ["a/b"],
            Metadata::default(),
            Arc::new(ContainerDispatch::new()),
        );
        assert!(matches!(result, Err(CatalogError::InvalidPath(_))));
    }

    #[test]
    fn test_len_sends_empty_fields() {
        let server = sample();
        let cat = catalog(&server);
        server.clear_requests();
        assert_eq!(cat.len().unwrap(), 4);
        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].param("fields"), Some(""));
    }

    #[test]
    fn test_get_and_lookup() {
        let server = sample();
        let cat = catalog(&server);
        assert!(cat.get("b").unwrap().is_some());
        assert!(cat.get("zzz").unwrap().is_none());
        assert!(matches!(cat.lookup("zzz"), Err(CatalogError::KeyNotFound(_))));
        assert!(cat.contains("nested").unwrap());
        assert!(cat.lookup("nested").unwrap().is_catalog());
    }

    #[test]
    fn test_display_makes_no_requests() {
        let server = sample();
        let cat = catalog(&server).search(Query::full_text("x"));
        server.clear_requests();
        let shown = cat.to_string();
        assert_eq!(shown, "<RemoteCatalog http://mock.local/ [fulltext(text=\"x\")]>");
        assert!(server.requests().is_empty());
    }

    #[test]
    fn test_slice_with_stop_before_start_is_empty() {
        let server = sample();
        let cat = catalog(&server);
        server.clear_requests();
        assert_eq!(cat.keys_slice(3, Some(1)).count(), 0);
        assert!(server.requests().is_empty());
    }

    #[test]
    fn test_get_path() {
        let server = sample();
        server.add_leaf("nested/inner", "array", Map::new());
        let cat = catalog(&server);
        let node = cat.get_path(&["nested", "inner"]).unwrap();
        assert_eq!(node.path(), &["nested".to_string(), "inner".to_string()]);
        assert!(node.as_array().is_some());

        let err = cat.get_path(&["a", "deeper"]).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPath(_)));
    }
}
