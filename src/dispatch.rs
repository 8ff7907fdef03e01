//! Container dispatch: server-declared container tag → client-side constructor
//!
//! Every leaf the server lists carries a `container` tag (e.g. `"array"`).
//! The dispatch table decides which [`DataSource`] implementation represents
//! it on the client. Custom containers are registered up front; the table is
//! then frozen behind an `Arc` and shared, unchanged, by every node in the tree.
//!
//! # Example
//!
//! ```no_run
//! use orbit_catalog::dispatch::{ContainerDispatch, SourceFactory};
//! use orbit_catalog::{DataSource, RemoteArraySource};
//! use std::sync::Arc;
//!
//! let mut dispatch = ContainerDispatch::new();
//! // Treat "zarr" containers like plain arrays
//! let zarr: SourceFactory =
//!     Arc::new(|ctx| Ok(Arc::new(RemoteArraySource::new(ctx)) as Arc<dyn DataSource>));
//! dispatch.register("zarr", zarr).unwrap();
//! assert!(dispatch.is_registered("zarr"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::array::RemoteArraySource;
use crate::error::{CatalogError, Result};
use crate::models::CATALOG_TYPE;
use crate::node::{DataSource, NodeContext};

/// Factory that builds the client-side representation of one leaf
pub type SourceFactory = Arc<dyn Fn(NodeContext) -> Result<Arc<dyn DataSource>> + Send + Sync>;

/// Registry of container factories
#[derive(Clone)]
pub struct ContainerDispatch {
    factories: HashMap<String, SourceFactory>,
}

impl ContainerDispatch {
    /// Table with the built-in containers (`array`)
    pub fn new() -> Self {
        let mut dispatch = Self::empty();
        dispatch.factories.insert(
            RemoteArraySource::CONTAINER.to_string(),
            Arc::new(|context| {
                Ok(Arc::new(RemoteArraySource::new(context)) as Arc<dyn DataSource>)
            }),
        );
        dispatch
    }

    /// Table with no containers registered
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register (or replace) the factory for `tag`
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::InvalidDispatch` if the tag is empty, contains
    /// whitespace, or is the reserved `catalog` type.
    pub fn register(&mut self, tag: impl Into<String>, factory: SourceFactory) -> Result<()> {
        let tag = tag.into();
        validate_tag(&tag)?;
        if self.factories.insert(tag.clone(), factory).is_some() {
            debug!(container = %tag, "replaced container dispatch entry");
        }
        Ok(())
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, tag: impl Into<String>, factory: SourceFactory) -> Result<Self> {
        self.register(tag, factory)?;
        Ok(self)
    }

    pub fn unregister(&mut self, tag: &str) -> bool {
        self.factories.remove(tag).is_some()
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Registered tags, sorted
    pub fn containers(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.factories.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Construct the source for a leaf declaring `container`
    pub fn build(&self, container: &str, context: NodeContext) -> Result<Arc<dyn DataSource>> {
        match self.factories.get(container) {
            Some(factory) => factory(context),
            None => {
                warn!(container, path = ?context.path, "no dispatch entry for container");
                Err(CatalogError::UnknownContainer(container.to_string()))
            }
        }
    }
}

impl Default for ContainerDispatch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContainerDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerDispatch")
            .field("containers", &self.containers())
            .finish()
    }
}

fn validate_tag(tag: &str) -> Result<()> {
    let reason = if tag.is_empty() {
        "tag must not be empty"
    } else if tag.chars().any(char::is_whitespace) {
        "tag must not contain whitespace"
    } else if tag == CATALOG_TYPE {
        "'catalog' is reserved for nested catalogs"
    } else {
        return Ok(());
    };
    Err(CatalogError::InvalidDispatch {
        tag: tag.to_string(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{CatalogNode, Metadata};
    use crate::transport::MockServer;

    fn context(path: &[&str]) -> NodeContext {
        NodeContext {
            transport: Arc::new(MockServer::new()),
            path: path.iter().map(|s| s.to_string()).collect(),
            metadata: Metadata::default(),
            dispatch: Arc::new(ContainerDispatch::new()),
        }
    }

    fn array_factory() -> SourceFactory {
        Arc::new(|ctx| Ok(Arc::new(RemoteArraySource::new(ctx)) as Arc<dyn DataSource>))
    }

    #[test]
    fn test_default_has_array() {
        let dispatch = ContainerDispatch::new();
        assert_eq!(dispatch.containers(), vec!["array".to_string()]);
        let source = dispatch.build("array", context(&["a"])).unwrap();
        assert_eq!(source.container(), "array");
        assert_eq!(source.path(), &["a".to_string()]);
    }

    #[test]
    fn test_unknown_container() {
        let dispatch = ContainerDispatch::empty();
        match dispatch.build("array", context(&["a"])) {
            Err(CatalogError::UnknownContainer(tag)) => assert_eq!(tag, "array"),
            other => panic!("expected UnknownContainer, got {:?}", other),
        }
    }

    #[test]
    fn test_registration_validation() {
        let mut dispatch = ContainerDispatch::new();
        assert!(dispatch.register("", array_factory()).is_err());
        assert!(dispatch.register("two words", array_factory()).is_err());
        assert!(matches!(
            dispatch.register("catalog", array_factory()),
            Err(CatalogError::InvalidDispatch { .. })
        ));
        assert!(dispatch.register("zarr", array_factory()).is_ok());
        assert!(dispatch.is_registered("zarr"));
        assert!(dispatch.unregister("zarr"));
        assert!(!dispatch.unregister("zarr"));
    }

    #[test]
    fn test_builder_style() {
        let dispatch = ContainerDispatch::empty()
            .with("hdf5", array_factory())
            .unwrap();
        assert_eq!(dispatch.containers(), vec!["hdf5".to_string()]);
        assert!(format!("{:?}", dispatch).contains("hdf5"));
    }
}
