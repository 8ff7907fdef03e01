//! In-memory catalog server for testing
//!
//! [`MockServer`] implements [`Transport`] by answering requests from an
//! in-memory tree instead of the network. It honours the same contract as a
//! real server: paginated `/search` listings with `links.next` and
//! `meta.count`, `filter[...]` parameters, `page[offset]` / `page[limit]`,
//! `fields` selection, `/metadata` documents and raw `/blob/array` blocks.
//! Every request is recorded so tests can assert on what went over the wire.
//!
//! Keys are used verbatim as URL path segments and should be URL-safe.
//!
//! # Example
//!
//! ```rust
//! use orbit_catalog::transport::MockServer;
//! use orbit_catalog::{ContainerDispatch, RemoteCatalog};
//! use serde_json::Map;
//! use std::sync::Arc;
//!
//! let server = MockServer::new().with_page_size(2);
//! server.add_leaf("a", "array", Map::new());
//! server.add_catalog("b", Map::new());
//!
//! let catalog =
//!     RemoteCatalog::connect(Arc::new(server.clone()), ContainerDispatch::new()).unwrap();
//! assert_eq!(catalog.len().unwrap(), 2);
//! ```

use ndarray::{ArrayD, Slice};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{trace, warn};
use url::Url;

use super::{Accept, Request, Response, Route, Transport};
use crate::array::{cartesian_product, encode_le, Element};
use crate::error::Result;
use crate::models::{
    DataType, Document, ItemAttributes, ItemRecord, NodeAttributes, NodeRecord, Page, PageLinks,
    PageMeta, StructureDescription, CATALOG_TYPE, DATA_SOURCE_TYPE,
};

/// Base URL the mock pretends to live at
pub const MOCK_BASE_URL: &str = "http://mock.local/";

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
struct MockArray {
    structure: StructureDescription,
    blocks: HashMap<Vec<usize>, Vec<u8>>,
}

#[derive(Debug, Clone)]
enum MockEntry {
    Catalog {
        metadata: Map<String, Value>,
    },
    Leaf {
        container: String,
        metadata: Map<String, Value>,
        array: Option<MockArray>,
    },
}

impl MockEntry {
    fn metadata(&self) -> &Map<String, Value> {
        match self {
            MockEntry::Catalog { metadata } | MockEntry::Leaf { metadata, .. } => metadata,
        }
    }
}

#[derive(Debug)]
struct MockState {
    page_size: usize,
    root_metadata: Map<String, Value>,
    entries: HashMap<Vec<String>, MockEntry>,
    /// Child keys of every catalog, in insertion order
    children: HashMap<Vec<String>, Vec<String>>,
    /// Entries whose key lookup answers with two records
    duplicates: HashSet<Vec<String>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            root_metadata: Map::new(),
            entries: HashMap::new(),
            children: HashMap::new(),
            duplicates: HashSet::new(),
        }
    }
}

/// A request as the mock server saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub route: Route,
    pub path: Vec<String>,
    pub params: Vec<(String, String)>,
    pub accept: Accept,
}

impl RecordedRequest {
    /// First value of `key`
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a repeated parameter
    pub fn param_values(&self, key: &str) -> Vec<&str> {
        self.params
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// `filter[...]` parameters in the order they were sent
    pub fn filters(&self) -> Vec<(&str, &str)> {
        self.params
            .iter()
            .filter(|(k, _)| k.starts_with("filter["))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

/// In-memory catalog server
///
/// Clones share state, so a test can keep one handle for setup and
/// inspection while the catalog under test owns another.
#[derive(Debug, Clone)]
pub struct MockServer {
    state: Arc<RwLock<MockState>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockServer {
    /// Create an empty server with the default page size
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::default())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the server-chosen page size (minimum 1)
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.write_state().page_size = page_size.max(1);
        self
    }

    pub fn set_root_metadata(&self, metadata: Map<String, Value>) {
        self.write_state().root_metadata = metadata;
    }

    /// Add a nested catalog at a `/`-separated path, creating missing parents
    pub fn add_catalog(&self, path: &str, metadata: Map<String, Value>) {
        self.insert(split(path), MockEntry::Catalog { metadata });
    }

    /// Add a leaf with the given container tag and no array data
    pub fn add_leaf(&self, path: &str, container: &str, metadata: Map<String, Value>) {
        self.insert(
            split(path),
            MockEntry::Leaf {
                container: container.to_string(),
                metadata,
                array: None,
            },
        );
    }

    /// Add an `array` leaf serving `data` split along `chunks`
    ///
    /// A chunk grid that does not tile `data` is stored as declared, with no
    /// blocks, so clients can be tested against inconsistent structures.
    pub fn add_array<T: Element>(
        &self,
        path: &str,
        data: &ArrayD<T>,
        chunks: Vec<Vec<usize>>,
        metadata: Map<String, Value>,
    ) {
        let structure = StructureDescription {
            shape: data.shape().to_vec(),
            dtype: DataType::from_element(T::TYPE),
            chunks,
        };
        let blocks = if structure.check_grid().is_ok() {
            split_blocks(data, &structure.chunks)
        } else {
            warn!(path, "mock array chunk grid does not tile its shape");
            HashMap::new()
        };
        self.insert(
            split(path),
            MockEntry::Leaf {
                container: "array".to_string(),
                metadata,
                array: Some(MockArray { structure, blocks }),
            },
        );
    }

    /// Replace the raw payload served for one block
    pub fn set_block(&self, path: &str, block: &[usize], bytes: Vec<u8>) {
        let mut state = self.write_state();
        if let Some(MockEntry::Leaf {
            array: Some(array), ..
        }) = state.entries.get_mut(&split(path))
        {
            array.blocks.insert(block.to_vec(), bytes);
        }
    }

    /// Make key lookups for `path` answer with two records
    pub fn add_duplicate(&self, path: &str) {
        self.write_state().duplicates.insert(split(path));
    }

    /// Remove an entry and everything below it
    pub fn remove(&self, path: &str) {
        let path = split(path);
        let mut state = self.write_state();
        state.entries.retain(|key, _| !key.starts_with(&path));
        state.children.retain(|key, _| !key.starts_with(&path));
        if let Some((leaf, parent)) = path.split_last() {
            if let Some(siblings) = state.children.get_mut(parent) {
                siblings.retain(|key| key != leaf);
            }
        }
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn requests_for(&self, route: Route) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.route == route)
            .collect()
    }

    pub fn clear_requests(&self) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, MockState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, path: Vec<String>, entry: MockEntry) {
        let mut state = self.write_state();
        for depth in 1..path.len() {
            let ancestor = path[..depth].to_vec();
            if !state.entries.contains_key(&ancestor) {
                state.entries.insert(
                    ancestor.clone(),
                    MockEntry::Catalog {
                        metadata: Map::new(),
                    },
                );
                link_child(&mut state, &ancestor);
            }
        }
        state.entries.insert(path.clone(), entry);
        link_child(&mut state, &path);
    }

    fn handle(&self, route: Route, path: &[String], params: &[(String, String)]) -> (u16, Vec<u8>) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match route {
            Route::Metadata => metadata_response(&state, path, params),
            Route::Search => search_response(&state, path, params),
            Route::ArrayBlob => blob_response(&state, path, params),
        }
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockServer {
    fn endpoint(&self) -> &str {
        MOCK_BASE_URL
    }

    fn get(&self, request: &Request) -> Result<Response> {
        let base = Url::parse(MOCK_BASE_URL)?;
        let url = request.resolve(&base)?;
        let params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let segments: Vec<String> = url
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let Some((route, path)) = parse_route(&segments) else {
            return Ok(Response::new(404, url.as_str(), error_body("no such route")));
        };

        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                route,
                path: path.to_vec(),
                params: params.clone(),
                accept: request.accept_kind(),
            });

        let (status, body) = self.handle(route, path, &params);
        trace!(url = %url, status, bytes = body.len(), "mock response");
        Ok(Response::new(status, url.as_str(), body))
    }
}

fn split(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn link_child(state: &mut MockState, path: &[String]) {
    if let Some((key, parent)) = path.split_last() {
        let siblings = state.children.entry(parent.to_vec()).or_default();
        if !siblings.contains(key) {
            siblings.push(key.clone());
        }
    }
}

fn parse_route(segments: &[String]) -> Option<(Route, &[String])> {
    match segments.first().map(String::as_str) {
        Some("metadata") => Some((Route::Metadata, &segments[1..])),
        Some("search") => Some((Route::Search, &segments[1..])),
        Some("blob") if segments.get(1).map(String::as_str) == Some("array") => {
            Some((Route::ArrayBlob, &segments[2..]))
        }
        _ => None,
    }
}

fn split_blocks<T: Element>(
    data: &ArrayD<T>,
    chunks: &[Vec<usize>],
) -> HashMap<Vec<usize>, Vec<u8>> {
    let offsets: Vec<Vec<usize>> = chunks
        .iter()
        .map(|extents| {
            extents
                .iter()
                .scan(0, |start, extent| {
                    let offset = *start;
                    *start += extent;
                    Some(offset)
                })
                .collect()
        })
        .collect();
    let axes: Vec<Vec<usize>> = chunks.iter().map(|c| (0..c.len()).collect()).collect();

    cartesian_product(&axes)
        .into_iter()
        .map(|block| {
            let view = data.slice_each_axis(|axis| {
                let dim = axis.axis.index();
                let start = offsets[dim][block[dim]];
                Slice::from(start..start + chunks[dim][block[dim]])
            });
            let bytes = encode_le(&view.to_owned());
            (block, bytes)
        })
        .collect()
}

fn error_body(detail: &str) -> Vec<u8> {
    json!({ "detail": detail }).to_string().into_bytes()
}

fn json_body<T: serde::Serialize>(value: &T) -> (u16, Vec<u8>) {
    match serde_json::to_vec(value) {
        Ok(body) => (200, body),
        Err(e) => (500, error_body(&e.to_string())),
    }
}

fn param_values<'a>(params: &'a [(String, String)], key: &str) -> Vec<&'a str> {
    params
        .iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .collect()
}

fn metadata_response(
    state: &MockState,
    path: &[String],
    params: &[(String, String)],
) -> (u16, Vec<u8>) {
    let fields = param_values(params, "fields");
    let wants = |field: &str| fields.is_empty() || fields.contains(&field);

    let (metadata, structure) = if path.is_empty() {
        (state.root_metadata.clone(), None)
    } else {
        match state.entries.get(path) {
            None => return (404, error_body("no such node")),
            Some(MockEntry::Catalog { metadata }) => (metadata.clone(), None),
            Some(MockEntry::Leaf {
                metadata, array, ..
            }) => (
                metadata.clone(),
                array.as_ref().map(|a| a.structure.clone()),
            ),
        }
    };

    let document = Document {
        data: NodeRecord {
            id: path.last().cloned(),
            attributes: NodeAttributes {
                metadata: wants("metadata").then_some(metadata),
                structure: structure.filter(|_| wants("structure")),
            },
        },
    };
    json_body(&document)
}

fn search_response(
    state: &MockState,
    path: &[String],
    params: &[(String, String)],
) -> (u16, Vec<u8>) {
    if !path.is_empty() && !matches!(state.entries.get(path), Some(MockEntry::Catalog { .. })) {
        return (404, error_body("no such catalog"));
    }

    let mut lookup_keys = Vec::new();
    let mut texts = Vec::new();
    for (key, value) in params.iter().filter(|(k, _)| k.starts_with("filter[")) {
        match key.as_str() {
            "filter[lookup][condition][key]" => lookup_keys.push(value.as_str()),
            "filter[fulltext][condition][text]" => texts.push(value.to_lowercase()),
            other => return (400, error_body(&format!("unsupported filter {}", other))),
        }
    }

    let children = state.children.get(path).cloned().unwrap_or_default();
    let mut matched: Vec<(String, Vec<String>)> = Vec::new();
    for key in children {
        let child: Vec<String> = path.iter().cloned().chain([key.clone()]).collect();
        let Some(entry) = state.entries.get(&child) else {
            continue;
        };
        if !lookup_keys.iter().all(|k| *k == key) {
            continue;
        }
        let haystack =
            format!("{} {}", key, Value::Object(entry.metadata().clone())).to_lowercase();
        if !texts.iter().all(|t| haystack.contains(t.as_str())) {
            continue;
        }
        if !lookup_keys.is_empty() && state.duplicates.contains(&child) {
            matched.push((key.clone(), child.clone()));
        }
        matched.push((key, child));
    }

    let parse = |key: &str, default: usize| -> std::result::Result<usize, String> {
        match params.iter().find(|(k, _)| k == key) {
            Some((_, v)) => v.parse().map_err(|_| format!("bad {}: {}", key, v)),
            None => Ok(default),
        }
    };
    let offset = match parse("page[offset]", 0) {
        Ok(offset) => offset,
        Err(e) => return (400, error_body(&e)),
    };
    let limit = match parse("page[limit]", state.page_size) {
        Ok(limit) => limit.clamp(1, state.page_size),
        Err(e) => return (400, error_body(&e)),
    };

    let fields = param_values(params, "fields");
    let all_fields = fields.is_empty();
    let count = matched.len();
    let end = offset.saturating_add(limit).min(count);
    let data: Vec<ItemRecord> = matched
        .get(offset.min(count)..end)
        .unwrap_or_default()
        .iter()
        .filter_map(|(key, child)| {
            let entry = state.entries.get(child)?;
            let (kind, container) = match entry {
                MockEntry::Catalog { .. } => (CATALOG_TYPE, None),
                MockEntry::Leaf { container, .. } => (DATA_SOURCE_TYPE, Some(container.clone())),
            };
            Some(ItemRecord {
                id: key.clone(),
                kind: kind.to_string(),
                attributes: ItemAttributes {
                    metadata: (all_fields || fields.contains(&"metadata"))
                        .then(|| entry.metadata().clone()),
                    container: container.filter(|_| all_fields || fields.contains(&"container")),
                },
            })
        })
        .collect();

    let next = (end < count).then(|| next_link(path, params, end, limit));
    let page = Page {
        data,
        links: PageLinks { next },
        meta: PageMeta { count: Some(count) },
    };
    json_body(&page)
}

/// Absolute link to the page starting at `offset`, repeating every
/// non-paging parameter of the current request
fn next_link(path: &[String], params: &[(String, String)], offset: usize, limit: usize) -> String {
    let mut link = format!("{}search", MOCK_BASE_URL);
    for segment in path {
        link.push('/');
        link.push_str(segment);
    }
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params.iter().filter(|(k, _)| !k.starts_with("page[")) {
        query.append_pair(key, value);
    }
    query.append_pair("page[offset]", &offset.to_string());
    query.append_pair("page[limit]", &limit.to_string());
    format!("{}?{}", link, query.finish())
}

fn blob_response(
    state: &MockState,
    path: &[String],
    params: &[(String, String)],
) -> (u16, Vec<u8>) {
    let Some(MockEntry::Leaf {
        array: Some(array), ..
    }) = state.entries.get(path)
    else {
        return (404, error_body("no such array"));
    };
    let Some(raw) = params.iter().find(|(k, _)| k == "block").map(|(_, v)| v) else {
        return (400, error_body("missing block parameter"));
    };
    let block: std::result::Result<Vec<usize>, _> =
        raw.split(',').map(|c| c.trim().parse::<usize>()).collect();
    match block {
        Ok(block) => match array.blocks.get(&block) {
            Some(bytes) => (200, bytes.clone()),
            None => (404, error_body("no such block")),
        },
        Err(_) => (400, error_body(&format!("bad block coordinate {}", raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn search(server: &MockServer, path: &[&str], params: &[(&str, &str)]) -> Response {
        let path: Vec<String> = path.iter().map(|s| s.to_string()).collect();
        let request = Request::new(Route::Search, &path).params(params.iter().copied());
        server.get(&request).unwrap()
    }

    #[test]
    fn test_pages_and_next_links() {
        let server = MockServer::new().with_page_size(2);
        for key in ["a", "b", "c"] {
            server.add_leaf(key, "array", Map::new());
        }
        let page: Page = search(&server, &[], &[("fields", "")]).json().unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.meta.count, Some(3));
        let next = page.links.next.unwrap();
        assert!(next.contains("page%5Boffset%5D=2"));

        let page: Page = server.get(&Request::follow(next)).unwrap().json().unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].id, "c");
        assert!(page.links.next.is_none());
    }

    #[test]
    fn test_fields_selection() {
        let server = MockServer::new();
        let mut metadata = Map::new();
        metadata.insert("k".to_string(), json!(1));
        server.add_leaf("a", "array", metadata);

        let page: Page = search(&server, &[], &[("fields", "")]).json().unwrap();
        assert!(page.data[0].attributes.metadata.is_none());
        assert!(page.data[0].attributes.container.is_none());

        let page: Page = search(&server, &[], &[("fields", "metadata"), ("fields", "container")])
            .json()
            .unwrap();
        assert_eq!(page.data[0].kind, DATA_SOURCE_TYPE);
        assert_eq!(page.data[0].attributes.container.as_deref(), Some("array"));
        assert!(page.data[0].attributes.metadata.is_some());
    }

    #[test]
    fn test_unknown_filter_is_rejected() {
        let server = MockServer::new();
        let response = search(&server, &[], &[("filter[regex][condition][pattern]", ".*")]);
        assert_eq!(response.status(), 400);
    }

    #[test]
    fn test_parents_are_created() {
        let server = MockServer::new();
        server.add_leaf("x/y/z", "array", Map::new());
        let page: Page = search(&server, &["x"], &[]).json().unwrap();
        assert_eq!(page.data[0].id, "y");
        assert_eq!(page.data[0].kind, CATALOG_TYPE);
    }

    #[test]
    fn test_blocks_are_split_little_endian() {
        let server = MockServer::new();
        let data = ArrayD::from_shape_vec(IxDyn(&[4]), vec![1u16, 2, 3, 4]).unwrap();
        server.add_array("v", &data, vec![vec![3, 1]], Map::new());
        let path = vec!["v".to_string()];
        let request = Request::new(Route::ArrayBlob, &path).param("block", "1");
        let response = server.get(&request).unwrap();
        assert_eq!(&response.body()[..], &[4u8, 0]);

        let request = Request::new(Route::ArrayBlob, &path).param("block", "2");
        assert_eq!(server.get(&request).unwrap().status(), 404);
    }

    #[test]
    fn test_remove_and_record() {
        let server = MockServer::new();
        server.add_leaf("a", "array", Map::new());
        server.add_leaf("b", "array", Map::new());
        server.remove("a");
        let page: Page = search(&server, &[], &[]).json().unwrap();
        assert_eq!(page.meta.count, Some(1));
        assert_eq!(server.requests_for(Route::Search).len(), 1);
        server.clear_requests();
        assert!(server.requests().is_empty());
    }
}
