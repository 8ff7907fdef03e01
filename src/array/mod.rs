//! Lazy chunked arrays
//!
//! [`RemoteArraySource::read`] returns a [`LazyArray`]: a map from block
//! coordinate to a deferred [`BlockTask`], plus the declared shape, dtype and
//! chunk grid. Blocks are fetched only when a region is computed, through a
//! pluggable [`BlockExecutor`].

mod buffer;
mod executor;
mod lazy;
mod source;

pub use buffer::{encode_le, Element, ElementType, NumericArray};
pub use executor::{executor_from_config, BlockExecutor, SequentialExecutor, ThreadPoolExecutor};
pub(crate) use lazy::cartesian_product;
pub use lazy::{BlockFetch, BlockTask, LazyArray, TaskKey};
pub use source::RemoteArraySource;
