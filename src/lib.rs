/*!
 * Orbit Catalog - client for remote hierarchical data catalogs
 *
 * A read-only client for catalog servers that list their contents through
 * a paginated search API and serve array data block by block:
 * - Lazy, paginated catalog mappings with composable search filters
 * - Keyed, positional and sliced access resolved server-side
 * - Container dispatch from server-declared tags to client-side sources
 * - Lazily fetched chunked arrays with pluggable block executors
 * - Blocking HTTP transport plus an in-memory mock server for tests
 *
 * Version: 0.1.0
 * Author: Shane Wall <shaneawall@gmail.com>
 */

pub mod array;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod models;
pub mod node;
pub mod query;
pub mod transport;

// Re-export commonly used types
pub use array::{
    BlockExecutor, LazyArray, NumericArray, RemoteArraySource, SequentialExecutor,
    ThreadPoolExecutor,
};
pub use catalog::{Indexer, Mapping, RemoteCatalog, Selection};
pub use config::{ClientConfig, ExecutorConfig, LogLevel};
pub use dispatch::ContainerDispatch;
pub use error::{CatalogError, Result};
pub use node::{CatalogNode, DataSource, Metadata, Node};
pub use query::Query;
pub use transport::{HttpTransport, MockServer, SharedTransport, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
