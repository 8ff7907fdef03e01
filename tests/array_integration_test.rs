/*!
 * Integration tests for lazily fetched remote arrays
 *
 * These tests verify that reading an array transfers nothing, that computing
 * a region only fetches the blocks overlapping it, and that malformed block
 * payloads are rejected.
 */

use ndarray::{ArrayD, IxDyn};
use serde_json::Map;
use std::collections::BTreeSet;
use std::sync::Arc;

use orbit_catalog::array::{BlockExecutor, ElementType, SequentialExecutor, ThreadPoolExecutor};
use orbit_catalog::error::ErrorCategory;
use orbit_catalog::transport::{Accept, MockServer, Route};
use orbit_catalog::{CatalogError, ContainerDispatch, RemoteArraySource, RemoteCatalog};

/// 4x4 float64 array holding 0..16, split into four 2x2 blocks
fn grid_server() -> (MockServer, ArrayD<f64>) {
    let server = MockServer::new();
    let data = ArrayD::from_shape_vec(IxDyn(&[4, 4]), (0..16).map(f64::from).collect()).unwrap();
    server.add_array("data/grid", &data, vec![vec![2, 2], vec![2, 2]], Map::new());
    (server, data)
}

fn open(server: &MockServer, path: &[&str]) -> RemoteArraySource {
    let catalog =
        RemoteCatalog::connect(Arc::new(server.clone()), ContainerDispatch::new()).unwrap();
    let node = catalog.get_path(path).unwrap();
    node.as_array().cloned().expect("node should be an array")
}

fn fetched_blocks(server: &MockServer) -> Vec<String> {
    server
        .requests_for(Route::ArrayBlob)
        .iter()
        .map(|request| request.param("block").unwrap_or_default().to_string())
        .collect()
}

fn values(array: orbit_catalog::NumericArray) -> Vec<f64> {
    array.into_array::<f64>().unwrap().iter().copied().collect()
}

#[test]
fn test_read_transfers_no_blocks() {
    let (server, _) = grid_server();
    let source = open(&server, &["data", "grid"]);
    server.clear_requests();

    let array = source.read().unwrap();
    assert_eq!(array.shape(), &[4, 4]);
    assert_eq!(array.element_type(), ElementType::F64);
    assert_eq!(array.chunks(), &[vec![2usize, 2], vec![2, 2]][..]);
    assert_eq!(array.tasks().count(), 4);
    assert_eq!(array.block_shape(&[1, 0]), Some(&[2usize, 2][..]));

    // Only the structure was fetched
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].route, Route::Metadata);
    assert_eq!(requests[0].param("fields"), Some("structure"));
}

#[test]
fn test_region_in_one_block_fetches_exactly_that_block() {
    let (server, _) = grid_server();
    let array = open(&server, &["data", "grid"]).read().unwrap();
    server.clear_requests();

    let region = array.compute_region(&[0..2, 2..4], &SequentialExecutor).unwrap();
    assert_eq!(region.shape(), &[2, 2]);
    assert_eq!(values(region), vec![2.0, 3.0, 6.0, 7.0]);
    assert_eq!(fetched_blocks(&server), vec!["0,1"]);
}

#[test]
fn test_full_row_fetches_the_two_covering_blocks() {
    let (server, _) = grid_server();
    let array = open(&server, &["data", "grid"]).read().unwrap();
    server.clear_requests();

    let row = array.compute_region(&[1..2, 0..4], &SequentialExecutor).unwrap();
    assert_eq!(values(row), vec![4.0, 5.0, 6.0, 7.0]);

    let blocks: BTreeSet<String> = fetched_blocks(&server).into_iter().collect();
    assert_eq!(server.requests_for(Route::ArrayBlob).len(), 2);
    assert_eq!(blocks, ["0,0", "0,1"].iter().map(|s| s.to_string()).collect());
}

#[test]
fn test_block_requests_ask_for_raw_bytes() {
    let (server, _) = grid_server();
    let array = open(&server, &["data", "grid"]).read().unwrap();
    server.clear_requests();

    array.compute_block(&[1, 1]).unwrap();
    let blobs = server.requests_for(Route::ArrayBlob);
    assert_eq!(blobs.len(), 1);
    assert_eq!(blobs[0].accept, Accept::OctetStream);
    assert_eq!(blobs[0].path, vec!["data".to_string(), "grid".to_string()]);
}

#[test]
fn test_compute_matches_source_data() {
    let (server, data) = grid_server();
    let array = open(&server, &["data", "grid"]).read().unwrap();
    server.clear_requests();

    let full = array.compute(&SequentialExecutor).unwrap();
    assert_eq!(full.into_array::<f64>().unwrap(), data);
    assert_eq!(server.requests_for(Route::ArrayBlob).len(), 4);
}

#[test]
fn test_malformed_block_is_an_integrity_error() {
    let (server, _) = grid_server();
    server.set_block("data/grid", &[0, 0], vec![0u8; 3]);

    // Building the lazy array succeeds; the failure surfaces on evaluation
    let array = open(&server, &["data", "grid"]).read().unwrap();
    let err = array.compute_block(&[0, 0]).unwrap_err();
    match err {
        CatalogError::MalformedBlock {
            ref block,
            expected,
            actual,
        } => {
            assert_eq!(block, &vec![0, 0]);
            assert_eq!(expected, 32);
            assert_eq!(actual, 3);
        }
        ref other => panic!("expected MalformedBlock, got {:?}", other),
    }
    assert_eq!(err.category(), ErrorCategory::Integrity);
    assert!(err.is_fatal());

    // Regions that avoid the bad block still evaluate
    assert!(array.compute_region(&[2..4, 2..4], &SequentialExecutor).is_ok());
    assert!(array.compute(&SequentialExecutor).is_err());
}

#[test]
fn test_thread_pool_matches_sequential() {
    let server = MockServer::new();
    let data = ArrayD::from_shape_vec(IxDyn(&[5, 3]), (0..15).collect::<Vec<i32>>()).unwrap();
    server.add_array("irregular", &data, vec![vec![2, 3], vec![1, 2]], Map::new());
    let array = open(&server, &["irregular"]).read().unwrap();

    let pool = ThreadPoolExecutor::new(4).unwrap();
    let sequential = array.compute_region(&[1..4, 0..3], &SequentialExecutor).unwrap();
    let parallel = array.compute_region(&[1..4, 0..3], &pool).unwrap();
    assert_eq!(pool.name(), "thread-pool");
    assert_eq!(
        sequential.into_array::<i32>().unwrap(),
        parallel.into_array::<i32>().unwrap()
    );
}

#[test]
fn test_graph_names_are_stable_and_unique() {
    let (server, data) = grid_server();
    server.add_array("data/other", &data, vec![vec![4], vec![4]], Map::new());

    let grid = open(&server, &["data", "grid"]);
    let first = grid.read().unwrap();
    let second = grid.read().unwrap();
    let other = open(&server, &["data", "other"]).read().unwrap();

    assert_eq!(first.name(), second.name());
    assert_ne!(first.name(), other.name());
    assert!(first.name().starts_with("remote-array-"));
    assert_eq!(first.task(&[0, 1]).unwrap().key().name, first.name());
}

#[test]
fn test_structure_is_refetched_on_every_read() {
    let (server, _) = grid_server();
    let source = open(&server, &["data", "grid"]);
    assert_eq!(source.read().unwrap().num_blocks(), vec![2, 2]);

    let bigger = ArrayD::from_shape_vec(IxDyn(&[6]), vec![1u8, 2, 3, 4, 5, 6]).unwrap();
    server.add_array("data/grid", &bigger, vec![vec![2, 2, 2]], Map::new());

    let array = source.read().unwrap();
    assert_eq!(array.shape(), &[6]);
    assert_eq!(array.element_type(), ElementType::U8);
    assert_eq!(array.num_blocks(), vec![3]);
}

#[test]
fn test_transport_errors_surface_at_evaluation() {
    let (server, _) = grid_server();
    let array = open(&server, &["data", "grid"]).read().unwrap();
    server.remove("data/grid");

    let err = array.compute_block(&[0, 0]).unwrap_err();
    assert!(matches!(err, CatalogError::Http { status: 404, .. }));
}

#[test]
fn test_region_validation() {
    let (server, _) = grid_server();
    let array = open(&server, &["data", "grid"]).read().unwrap();
    server.clear_requests();

    assert!(matches!(
        array.compute_region(&[0..5, 0..1], &SequentialExecutor),
        Err(CatalogError::InvalidIndexer(_))
    ));
    assert!(array.compute_region(&[0..1], &SequentialExecutor).is_err());
    assert!(array.compute_block(&[2, 0]).is_err());
    assert!(server.requests().is_empty());

    let empty = array.compute_region(&[1..1, 0..4], &SequentialExecutor).unwrap();
    assert!(empty.is_empty());
}

#[test]
fn test_missing_structure_is_malformed_response() {
    let server = MockServer::new();
    server.add_leaf("bare", "array", Map::new());
    let err = open(&server, &["bare"]).read().unwrap_err();
    assert!(matches!(err, CatalogError::MalformedResponse(_)));
}
