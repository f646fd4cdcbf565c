use crate::error::{Error, Result};
use std::any::{Any, TypeId};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Request-scoped propagation context.
///
/// A `Context` is an immutable chain of values keyed by *type*, plus an
/// optional deadline. Deriving a child never touches the parent, so one
/// parent can be handed to several concurrent branches of a call tree.
/// Cloning is a reference-count bump.
///
/// Keys are types rather than strings: a module that keeps its key type
/// private is the only code that can read or write its association.
///
/// # Examples
///
/// ```rust
/// use sqlx_txpool::Context;
///
/// struct RequestId;
///
/// let root = Context::background();
/// let child = root.with_value::<RequestId, _>(42u64);
///
/// assert_eq!(child.value::<RequestId, u64>(), Some(&42));
/// assert_eq!(root.value::<RequestId, u64>(), None);
/// ```
#[derive(Clone, Default)]
pub struct Context {
    node: Option<Arc<Node>>,
    deadline: Option<Instant>,
}

struct Node {
    key: TypeId,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Node>>,
}

impl Context {
    /// Returns the empty root context: no values, no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a child that associates the key type `K` with `value`.
    ///
    /// A later association for the same key shadows earlier ones for
    /// every descendant of the child.
    pub fn with_value<K, V>(&self, value: V) -> Self
    where
        K: 'static,
        V: Any + Send + Sync,
    {
        Self {
            node: Some(Arc::new(Node {
                key: TypeId::of::<K>(),
                value: Arc::new(value),
                parent: self.node.clone(),
            })),
            deadline: self.deadline,
        }
    }

    /// Returns the nearest value stored under `K`, if it is a `V`.
    ///
    /// Only the nearest association for `K` is considered; a type mismatch
    /// there yields `None` rather than searching further up the chain.
    pub fn value<K, V>(&self) -> Option<&V>
    where
        K: 'static,
        V: Any,
    {
        let key = TypeId::of::<K>();
        let mut node = self.node.as_deref();
        while let Some(current) = node {
            if current.key == key {
                return current.value.downcast_ref::<V>();
            }
            node = current.parent.as_deref();
        }
        None
    }

    /// Derives a child that must finish its work before `deadline`.
    ///
    /// An earlier deadline already carried by `self` is kept.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            node: self.node.clone(),
            deadline: Some(deadline),
        }
    }

    /// Derives a child whose deadline is `timeout` from now.
    ///
    /// A timeout too large to represent as an [`Instant`] adds no deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// The deadline carried by this context, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drives a provider operation under this context's deadline.
    ///
    /// Without a deadline the future simply runs to completion. When the
    /// deadline elapses first the future is dropped, which aborts the
    /// in-flight operation, and [`Error::DeadlineExceeded`] is returned.
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<Error>,
    {
        match self.deadline {
            None => fut.await.map_err(Into::into),
            Some(deadline) => {
                match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), fut).await
                {
                    Ok(result) => result.map_err(Into::into),
                    Err(_elapsed) => Err(Error::DeadlineExceeded),
                }
            }
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut depth = 0;
        let mut node = self.node.as_deref();
        while let Some(current) = node {
            depth += 1;
            node = current.parent.as_deref();
        }
        f.debug_struct("Context")
            .field("values", &depth)
            .field("deadline", &self.deadline)
            .finish()
    }
}
