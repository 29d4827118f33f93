//! Append-only store of finished executions.
//!
//! Writers are serialized by a mutex and publish a new snapshot through
//! `ArcSwap`; readers load the current snapshot without locking. Snapshots
//! are persistent `im::Vector`s, so an append shares structure with the
//! previous snapshot instead of copying it. Recorded contexts are shared as
//! `Arc<ExecutionContext>` and never mutated again.
//!
//! One registry is normally created at process start and shared by handing
//! the same `Arc<ExecutionRegistry>` to every `Runtime`.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use im::Vector;
use rampart_types::execution::{ExecutionStatus, ExecutionSummary, NodeKind};

use crate::context::ExecutionContext;
use crate::error::RegistryError;

type Entries = Vector<Arc<ExecutionContext>>;
type Snapshot = Arc<Entries>;
type Predicate = Arc<dyn Fn(&ExecutionContext) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// ExecutionRegistry
// ---------------------------------------------------------------------------

pub struct ExecutionRegistry {
    entries: ArcSwap<Entries>,
    write: Mutex<()>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vector::new()),
            write: Mutex::new(()),
        }
    }

    /// Append a finished context, assigning its index. The only mutation
    /// entry point.
    pub fn record(&self, mut context: ExecutionContext) -> Arc<ExecutionContext> {
        let _guard = self.write.lock().expect("registry write lock poisoned");
        let mut next = Entries::clone(&self.entries.load());
        context.set_index(next.len());

        let context = Arc::new(context);
        next.push_back(Arc::clone(&context));
        self.entries.store(Arc::new(next));
        context
    }

    /// Consistent point-in-time view of every recorded context.
    pub fn snapshot(&self) -> Snapshot {
        self.entries.load_full()
    }

    /// Contexts matching `filter`, in insertion order.
    pub fn query(&self, filter: ExecutionFilter) -> ExecutionQuery {
        self.query_by(move |ctx| filter.matches(ctx))
    }

    /// Contexts matching an arbitrary predicate, in insertion order.
    pub fn query_by<F>(&self, predicate: F) -> ExecutionQuery
    where
        F: Fn(&ExecutionContext) -> bool + Send + Sync + 'static,
    {
        ExecutionQuery {
            snapshot: self.snapshot(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn by_index(&self, index: usize) -> Result<Arc<ExecutionContext>, RegistryError> {
        let snapshot = self.entries.load();
        snapshot
            .get(index)
            .cloned()
            .ok_or(RegistryError::NotFound {
                index,
                len: snapshot.len(),
            })
    }

    pub fn by_name(&self, name: &str) -> Vec<Arc<ExecutionContext>> {
        self.entries
            .load()
            .iter()
            .filter(|ctx| ctx.name() == name)
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<Arc<ExecutionContext>> {
        self.entries.load().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record. Indexes restart at zero.
    pub fn reset(&self) {
        let _guard = self.write.lock().expect("registry write lock poisoned");
        self.entries.store(Arc::new(Vector::new()));
    }

    pub fn summaries(&self) -> Vec<ExecutionSummary> {
        self.entries.load().iter().map(|ctx| ctx.summary()).collect()
    }
}

impl Default for ExecutionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRegistry")
            .field("len", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Filters and queries
// ---------------------------------------------------------------------------

/// Field filter for registry queries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionFilter {
    pub name: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub kind: Option<NodeKind>,
}

impl ExecutionFilter {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn kind(mut self, kind: NodeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn matches(&self, ctx: &ExecutionContext) -> bool {
        self.name.as_deref().is_none_or(|n| n == ctx.name())
            && self.status.is_none_or(|s| s == ctx.status())
            && self.kind.is_none_or(|k| k == ctx.kind())
    }
}

/// Lazy, restartable view over one registry snapshot.
///
/// Every call to [`ExecutionQuery::iter`] walks the same snapshot from the
/// start; records appended after the query was created are not visible.
#[derive(Clone)]
pub struct ExecutionQuery {
    snapshot: Snapshot,
    predicate: Predicate,
}

impl ExecutionQuery {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ExecutionContext>> + '_ {
        self.snapshot.iter().filter(|ctx| (self.predicate)(&***ctx))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn to_vec(&self) -> Vec<Arc<ExecutionContext>> {
        self.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a ExecutionQuery {
    type Item = &'a Arc<ExecutionContext>;
    type IntoIter = Box<dyn Iterator<Item = &'a Arc<ExecutionContext>> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
