//! Lazy, block-addressed arrays
//!
//! A [`LazyArray`] is a task graph: one [`BlockTask`] per block of an
//! irregular chunk grid, plus the declared shape and dtype. Building it
//! transfers nothing. Bytes move only when a block or region is computed,
//! and only for the blocks that overlap the requested region.

use ndarray::{ArrayD, IxDyn, Slice};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, warn};

use super::buffer::{with_element_type, Element, ElementType, NumericArray};
use super::executor::BlockExecutor;
use crate::error::{CatalogError, Result};
use crate::models::{DataType, StructureDescription};

/// Fetches the data of one block
///
/// Implementations are called from executor worker threads and must not rely
/// on shared mutable state.
pub trait BlockFetch: Send + Sync + fmt::Debug {
    fn fetch_block(&self, block: &[usize], dtype: &DataType, shape: &[usize])
        -> Result<NumericArray>;
}

/// Identity of a block within a task graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub name: String,
    pub block: Vec<usize>,
}

/// Deferred `fetch(block, dtype, shape)` for one block
#[derive(Debug, Clone)]
pub struct BlockTask {
    key: TaskKey,
    dtype: DataType,
    shape: Vec<usize>,
    fetcher: Arc<dyn BlockFetch>,
}

impl BlockTask {
    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn block(&self) -> &[usize] {
        &self.key.block
    }

    pub fn dtype(&self) -> &DataType {
        &self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Execute the fetch. The result must have exactly the declared extents.
    pub fn run(&self) -> Result<NumericArray> {
        let data = self
            .fetcher
            .fetch_block(&self.key.block, &self.dtype, &self.shape)?;
        check_block_shape(&self.key.block, &self.shape, &data)?;
        Ok(data)
    }
}

/// Chunked array whose blocks are fetched on demand
#[derive(Debug, Clone)]
pub struct LazyArray {
    name: String,
    shape: Vec<usize>,
    dtype: DataType,
    element: ElementType,
    chunks: Vec<Vec<usize>>,
    /// Start offset of every block along each dimension
    offsets: Vec<Vec<usize>>,
    tasks: BTreeMap<Vec<usize>, BlockTask>,
}

impl LazyArray {
    /// Build the task graph for `structure`. Nothing is fetched.
    pub fn new(
        name: impl Into<String>,
        structure: StructureDescription,
        fetcher: Arc<dyn BlockFetch>,
    ) -> Result<Self> {
        structure.check_grid()?;
        let element = structure.dtype.element_type()?;
        let name = name.into();

        let offsets: Vec<Vec<usize>> = structure
            .chunks
            .iter()
            .map(|extents| {
                extents
                    .iter()
                    .scan(0usize, |start, extent| {
                        let offset = *start;
                        *start += extent;
                        Some(offset)
                    })
                    .collect()
            })
            .collect();

        let axes: Vec<Vec<usize>> = structure
            .chunks
            .iter()
            .map(|extents| (0..extents.len()).collect())
            .collect();

        let tasks: BTreeMap<Vec<usize>, BlockTask> = cartesian_product(&axes)
            .into_iter()
            .map(|block| {
                let shape = block
                    .iter()
                    .enumerate()
                    .map(|(dim, &index)| structure.chunks[dim][index])
                    .collect();
                let task = BlockTask {
                    key: TaskKey {
                        name: name.clone(),
                        block: block.clone(),
                    },
                    dtype: structure.dtype.clone(),
                    shape,
                    fetcher: Arc::clone(&fetcher),
                };
                (block, task)
            })
            .collect();

        debug!(name = %name, blocks = tasks.len(), shape = ?structure.shape, "built lazy array");

        Ok(Self {
            name,
            shape: structure.shape,
            dtype: structure.dtype,
            element,
            chunks: structure.chunks,
            offsets,
            tasks,
        })
    }

    /// Task-graph name, unique per (server, path)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn dtype(&self) -> &DataType {
        &self.dtype
    }

    pub fn element_type(&self) -> ElementType {
        self.element
    }

    pub fn chunks(&self) -> &[Vec<usize>] {
        &self.chunks
    }

    /// Number of blocks along each dimension
    pub fn num_blocks(&self) -> Vec<usize> {
        self.chunks.iter().map(Vec::len).collect()
    }

    /// All tasks, ordered by block coordinate
    pub fn tasks(&self) -> impl Iterator<Item = &BlockTask> {
        self.tasks.values()
    }

    pub fn task(&self, block: &[usize]) -> Option<&BlockTask> {
        self.tasks.get(block)
    }

    pub fn block_shape(&self, block: &[usize]) -> Option<&[usize]> {
        self.task(block).map(BlockTask::shape)
    }

    /// Fetch a single block
    pub fn compute_block(&self, block: &[usize]) -> Result<NumericArray> {
        let task = self.task(block).ok_or_else(|| {
            CatalogError::InvalidIndexer(format!(
                "block {:?} outside grid {:?}",
                block,
                self.num_blocks()
            ))
        })?;
        task.run()
    }

    /// Coordinates of the blocks that intersect `region`
    pub fn blocks_overlapping(&self, region: &[Range<usize>]) -> Result<Vec<Vec<usize>>> {
        self.check_region(region)?;
        let axes: Vec<Vec<usize>> = region
            .iter()
            .enumerate()
            .map(|(dim, range)| {
                self.chunks[dim]
                    .iter()
                    .enumerate()
                    .filter(|&(index, &extent)| {
                        let start = self.offsets[dim][index];
                        range.start < range.end && start < range.end && start + extent > range.start
                    })
                    .map(|(index, _)| index)
                    .collect()
            })
            .collect();
        if axes.iter().any(Vec::is_empty) {
            return Ok(Vec::new());
        }
        Ok(cartesian_product(&axes))
    }

    /// Materialise `region` (one half-open range per dimension), fetching
    /// only the overlapping blocks through `executor`
    pub fn compute_region(
        &self,
        region: &[Range<usize>],
        executor: &dyn BlockExecutor,
    ) -> Result<NumericArray> {
        let blocks = self.blocks_overlapping(region)?;
        let tasks: Vec<&BlockTask> = blocks
            .iter()
            .filter_map(|block| self.tasks.get(block))
            .collect();

        debug!(
            name = %self.name,
            region = ?region,
            blocks = tasks.len(),
            executor = executor.name(),
            "computing region"
        );
        let fetched = executor.execute(&tasks)?;

        if fetched.len() != tasks.len() {
            return Err(CatalogError::MalformedResponse(format!(
                "executor {} returned {} blocks for {} tasks",
                executor.name(),
                fetched.len(),
                tasks.len()
            )));
        }
        let pieces: Vec<Piece> = tasks
            .iter()
            .zip(fetched)
            .map(|(task, data)| -> Result<Piece> {
                check_block_shape(task.block(), task.shape(), &data)?;
                Ok(self.piece(task.block(), region, data))
            })
            .collect::<Result<Vec<_>>>()?;

        let shape: Vec<usize> = region.iter().map(|r| r.end - r.start).collect();
        with_element_type!(self.element, T => assemble::<T>(&shape, pieces))
    }

    /// Materialise the whole array
    pub fn compute(&self, executor: &dyn BlockExecutor) -> Result<NumericArray> {
        let region: Vec<Range<usize>> = self.shape.iter().map(|&extent| 0..extent).collect();
        self.compute_region(&region, executor)
    }

    fn check_region(&self, region: &[Range<usize>]) -> Result<()> {
        if region.len() != self.shape.len() {
            return Err(CatalogError::InvalidIndexer(format!(
                "region has {} dimensions, array has {}",
                region.len(),
                self.shape.len()
            )));
        }
        for (dim, (range, &extent)) in region.iter().zip(&self.shape).enumerate() {
            if range.start > range.end || range.end > extent {
                return Err(CatalogError::InvalidIndexer(format!(
                    "range {:?} invalid for dimension {} of extent {}",
                    range, dim, extent
                )));
            }
        }
        Ok(())
    }

    /// Where `data` (block `block`) lands inside `region`
    fn piece(&self, block: &[usize], region: &[Range<usize>], data: NumericArray) -> Piece {
        let mut source = Vec::with_capacity(block.len());
        let mut target = Vec::with_capacity(block.len());
        for (dim, &index) in block.iter().enumerate() {
            let block_start = self.offsets[dim][index];
            let block_end = block_start + self.chunks[dim][index];
            let lo = block_start.max(region[dim].start);
            let hi = block_end.min(region[dim].end);
            source.push(lo - block_start..hi - block_start);
            target.push(lo - region[dim].start..hi - region[dim].start);
        }
        Piece {
            data,
            source,
            target,
        }
    }
}

/// Reject data whose extents differ from the declared block shape
fn check_block_shape(block: &[usize], expected: &[usize], data: &NumericArray) -> Result<()> {
    if data.shape() == expected {
        return Ok(());
    }
    warn!(
        block = ?block,
        expected = ?expected,
        actual = ?data.shape(),
        "fetched block has wrong shape"
    );
    Err(CatalogError::BlockShapeMismatch {
        block: block.to_vec(),
        expected: expected.to_vec(),
        actual: data.shape().to_vec(),
    })
}

struct Piece {
    data: NumericArray,
    source: Vec<Range<usize>>,
    target: Vec<Range<usize>>,
}

fn assemble<T: Element>(shape: &[usize], pieces: Vec<Piece>) -> Result<NumericArray> {
    let mut out = ArrayD::<T>::default(IxDyn(shape));
    for piece in pieces {
        let found = piece.data.element_type();
        let block = piece.data.into_array::<T>().ok_or_else(|| {
            CatalogError::MalformedResponse(format!(
                "block decoded as {}, array declares {}",
                found,
                T::TYPE
            ))
        })?;
        if block.ndim() != shape.len() {
            return Err(CatalogError::MalformedResponse(format!(
                "block has {} dimensions, array has {}",
                block.ndim(),
                shape.len()
            )));
        }
        let source =
            block.slice_each_axis(|axis| Slice::from(piece.source[axis.axis.index()].clone()));
        out.slice_each_axis_mut(|axis| Slice::from(piece.target[axis.axis.index()].clone()))
            .assign(&source);
    }
    Ok(T::wrap(out))
}

/// Every combination of one value per axis, last axis varying fastest
pub(crate) fn cartesian_product(axes: &[Vec<usize>]) -> Vec<Vec<usize>> {
    axes.iter().fold(vec![Vec::new()], |acc, axis| {
        acc.into_iter()
            .flat_map(|prefix| {
                axis.iter().map(move |&value| {
                    let mut next = prefix.clone();
                    next.push(value);
                    next
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::buffer::encode_le;
    use crate::array::executor::SequentialExecutor;
    use ndarray::{Array, IxDyn};
    use std::sync::Mutex;

    /// Serves blocks sliced out of an in-memory array and records each call
    #[derive(Debug)]
    struct SlicingFetcher {
        data: ArrayD<f64>,
        chunks: Vec<Vec<usize>>,
        calls: Mutex<Vec<Vec<usize>>>,
    }

    impl BlockFetch for SlicingFetcher {
        fn fetch_block(
            &self,
            block: &[usize],
            dtype: &DataType,
            shape: &[usize],
        ) -> Result<NumericArray> {
            self.calls.lock().unwrap().push(block.to_vec());
            let view = self.data.slice_each_axis(|axis| {
                let dim = axis.axis.index();
                let start: usize = self.chunks[dim][..block[dim]].iter().sum();
                Slice::from(start..start + self.chunks[dim][block[dim]])
            });
            let bytes = encode_le(&view.to_owned());
            NumericArray::decode(&bytes, dtype, shape)
        }
    }

    fn fixture(shape: &[usize], chunks: Vec<Vec<usize>>) -> (LazyArray, Arc<SlicingFetcher>) {
        let len: usize = shape.iter().product();
        let data = Array::from_shape_vec(IxDyn(shape), (0..len).map(|v| v as f64).collect())
            .unwrap();
        let fetcher = Arc::new(SlicingFetcher {
            data,
            chunks: chunks.clone(),
            calls: Mutex::new(Vec::new()),
        });
        let structure = StructureDescription {
            shape: shape.to_vec(),
            dtype: DataType::from_element(ElementType::F64),
            chunks,
        };
        let array = LazyArray::new("test-array", structure, fetcher.clone()).unwrap();
        (array, fetcher)
    }

    #[test]
    fn test_cartesian_product() {
        assert_eq!(
            cartesian_product(&[vec![0, 1], vec![0, 1, 2]]),
            vec![
                vec![0, 0],
                vec![0, 1],
                vec![0, 2],
                vec![1, 0],
                vec![1, 1],
                vec![1, 2]
            ]
        );
        assert_eq!(cartesian_product(&[]), vec![Vec::<usize>::new()]);
    }

    #[test]
    fn test_irregular_grid_tasks() {
        let (array, fetcher) = fixture(&[5, 3], vec![vec![2, 3], vec![1, 2]]);
        assert_eq!(array.num_blocks(), vec![2, 2]);
        assert_eq!(array.tasks().count(), 4);
        assert_eq!(array.block_shape(&[1, 1]), Some(&[3usize, 2][..]));
        assert_eq!(array.block_shape(&[0, 0]), Some(&[2usize, 1][..]));
        assert!(array.block_shape(&[2, 0]).is_none());
        assert!(fetcher.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_region_fetches_only_overlapping_blocks() {
        let (array, fetcher) = fixture(&[5, 3], vec![vec![2, 3], vec![1, 2]]);
        let region = array
            .compute_region(&[1..3, 0..1], &SequentialExecutor)
            .unwrap()
            .into_array::<f64>()
            .unwrap();

        assert_eq!(region.shape(), &[2, 1]);
        assert_eq!(region[[0, 0]], 3.0);
        assert_eq!(region[[1, 0]], 6.0);
        assert_eq!(
            *fetcher.calls.lock().unwrap(),
            vec![vec![0, 0], vec![1, 0]]
        );
    }

    #[test]
    fn test_compute_whole_array() {
        let (array, fetcher) = fixture(&[5, 3], vec![vec![2, 3], vec![1, 2]]);
        let full = array
            .compute(&SequentialExecutor)
            .unwrap()
            .into_array::<f64>()
            .unwrap();
        let expected: Vec<f64> = (0..15).map(|v| v as f64).collect();
        assert_eq!(full.iter().copied().collect::<Vec<_>>(), expected);
        assert_eq!(fetcher.calls.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_empty_region_fetches_nothing() {
        let (array, fetcher) = fixture(&[4], vec![vec![2, 2]]);
        let empty = array.compute_region(&[2..2], &SequentialExecutor).unwrap();
        assert!(empty.is_empty());
        assert!(fetcher.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_regions() {
        let (array, _) = fixture(&[4, 4], vec![vec![2, 2], vec![2, 2]]);
        assert!(array.blocks_overlapping(&[0..2]).is_err());
        assert!(array.blocks_overlapping(&[0..5, 0..1]).is_err());
        #[allow(clippy::reversed_empty_ranges)]
        let backwards = [3..1, 0..1];
        assert!(array.blocks_overlapping(&backwards).is_err());
        assert!(array.compute_block(&[2, 0]).is_err());
    }

    /// Always answers with a 1x1 block, whatever the grid declares
    #[derive(Debug)]
    struct ShortBlockFetcher;

    impl BlockFetch for ShortBlockFetcher {
        fn fetch_block(
            &self,
            _block: &[usize],
            _dtype: &DataType,
            _shape: &[usize],
        ) -> Result<NumericArray> {
            Ok(ArrayD::<f64>::zeros(IxDyn(&[1, 1])).into())
        }
    }

    /// Ignores its tasks and returns a single 1x1 block per task
    struct ShortBlockExecutor;

    impl BlockExecutor for ShortBlockExecutor {
        fn execute(&self, tasks: &[&BlockTask]) -> Result<Vec<NumericArray>> {
            Ok(tasks
                .iter()
                .map(|_| ArrayD::<f64>::zeros(IxDyn(&[1, 1])).into())
                .collect())
        }

        fn name(&self) -> &'static str {
            "short"
        }
    }

    fn short_block_array() -> LazyArray {
        crate::logging::init_test_logging();
        let structure = StructureDescription {
            shape: vec![4, 4],
            dtype: DataType::from_element(ElementType::F64),
            chunks: vec![vec![2, 2], vec![2, 2]],
        };
        LazyArray::new("short-blocks", structure, Arc::new(ShortBlockFetcher)).unwrap()
    }

    #[test]
    fn test_block_with_wrong_extents_is_an_error() {
        let array = short_block_array();
        let err = array
            .compute_region(&[0..2, 0..2], &SequentialExecutor)
            .unwrap_err();
        match err {
            CatalogError::BlockShapeMismatch {
                ref block,
                ref expected,
                ref actual,
            } => {
                assert_eq!(block, &vec![0, 0]);
                assert_eq!(expected, &vec![2, 2]);
                assert_eq!(actual, &vec![1, 1]);
            }
            ref other => panic!("expected BlockShapeMismatch, got {:?}", other),
        }
        assert_eq!(err.category(), crate::error::ErrorCategory::Integrity);
        assert!(array.compute_block(&[1, 1]).is_err());
    }

    #[test]
    fn test_executor_output_is_checked() {
        let (array, _) = fixture(&[4, 4], vec![vec![2, 2], vec![2, 2]]);
        assert!(matches!(
            array.compute_region(&[0..4, 0..4], &ShortBlockExecutor),
            Err(CatalogError::BlockShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_scalar_array_has_one_block() {
        let (array, _) = fixture(&[], vec![]);
        assert_eq!(array.tasks().count(), 1);
        let value = array.compute(&SequentialExecutor).unwrap();
        assert_eq!(value.len(), 1);
    }
}
