//! Page walking over `/search` listings
//!
//! Plain iteration always follows the server's `links.next` until it is null;
//! offsets are only ever sent on the first request of a slice.

use std::sync::Arc;
use tracing::trace;

use crate::dispatch::ContainerDispatch;
use crate::error::Result;
use crate::models::{ItemRecord, Page};
use crate::node::{Node, NodePath};
use crate::transport::{Request, SharedTransport, Transport};

/// Fetch and decode one listing page
pub(crate) fn fetch_page(transport: &dyn Transport, request: &Request) -> Result<Page> {
    transport.get(request)?.error_for_status()?.json()
}

/// Lazily fetches successive pages
///
/// `carry` holds the parameters re-sent with every followed link (fields and
/// filters). Page cursors come from the link itself.
#[derive(Debug)]
pub(crate) struct PageWalker {
    transport: SharedTransport,
    next: Option<Request>,
    carry: Vec<(String, String)>,
    fetched: usize,
}

impl PageWalker {
    pub(crate) fn new(
        transport: SharedTransport,
        first: Request,
        carry: Vec<(String, String)>,
    ) -> Self {
        Self {
            transport,
            next: Some(first),
            carry,
            fetched: 0,
        }
    }
}

impl Iterator for PageWalker {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        let request = self.next.take()?;
        match fetch_page(self.transport.as_ref(), &request) {
            Ok(page) => {
                self.fetched += 1;
                trace!(
                    page = self.fetched,
                    items = page.data.len(),
                    has_next = page.links.next.is_some(),
                    "fetched page"
                );
                self.next = page
                    .links
                    .next
                    .as_ref()
                    .map(|link| Request::follow(link.as_str()).params(self.carry.iter().cloned()));
                Some(Ok(page))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Item records across pages, optionally capped at a number of items
#[derive(Debug)]
pub(crate) struct Records {
    pages: PageWalker,
    buffer: std::vec::IntoIter<ItemRecord>,
    remaining: Option<usize>,
    finished: bool,
}

impl Records {
    pub(crate) fn new(pages: PageWalker, limit: Option<usize>) -> Self {
        Self {
            pages,
            buffer: Vec::new().into_iter(),
            remaining: limit,
            finished: false,
        }
    }
}

impl Iterator for Records {
    type Item = Result<ItemRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            // Stop before requesting another page once the cap is reached
            if self.remaining == Some(0) {
                self.finished = true;
                return None;
            }
            if let Some(record) = self.buffer.next() {
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Some(Ok(record));
            }
            match self.pages.next() {
                Some(Ok(page)) => self.buffer = page.data.into_iter(),
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

/// Lazy sequence of keys. Each call to a catalog's `keys()` starts a fresh walk.
#[derive(Debug)]
pub struct Keys {
    records: Records,
}

impl Keys {
    pub(crate) fn new(records: Records) -> Self {
        Self { records }
    }
}

impl Iterator for Keys {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next().map(|record| record.map(|r| r.id))
    }
}

/// Lazy sequence of `(key, node)` pairs
#[derive(Debug)]
pub struct Items {
    records: Records,
    transport: SharedTransport,
    parent: NodePath,
    dispatch: Arc<ContainerDispatch>,
}

impl Items {
    pub(crate) fn new(
        records: Records,
        transport: SharedTransport,
        parent: NodePath,
        dispatch: Arc<ContainerDispatch>,
    ) -> Self {
        Self {
            records,
            transport,
            parent,
            dispatch,
        }
    }
}

impl Iterator for Items {
    type Item = Result<(String, Node)>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e)),
        };
        let key = record.id.clone();
        Some(
            Node::from_record(&self.transport, &self.parent, &self.dispatch, record)
                .map(|node| (key, node)),
        )
    }
}

/// Lazy sequence of nodes
#[derive(Debug)]
pub struct Values {
    items: Items,
}

impl Values {
    pub(crate) fn new(items: Items) -> Self {
        Self { items }
    }
}

impl Iterator for Values {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next().map(|item| item.map(|(_, node)| node))
    }
}
