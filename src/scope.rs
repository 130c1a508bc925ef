//! Binding of "the current registry" to a logical operation.
//!
//! Code deep inside a request handler reads picks through [`current`] (usually via
//! [`Pick`](crate::Pick)) instead of passing a [`Registry`] around. The binding belongs to the
//! operation that created it:
//!
//! - On a tokio runtime, bindings live in a task-local slot. Run each operation in
//!   [`isolated`] (or use [`run`], which does it for you) so that concurrent tasks never observe
//!   each other's registry, no matter how they interleave.
//! - Outside of a tokio runtime, bindings live in a thread-local slot. That slot is shared by
//!   everything running on the thread, so on any other async executor the same rule applies:
//!   wrap each operation in [`isolated`] or [`run`], never call [`enter`] directly.
//!
//! Scopes nest like a stack: [`enter`] pushes a binding and the returned [`ScopeGuard`] removes
//! exactly that binding when dropped, including on early return, panic, and cancellation of the
//! enclosing future. Guards may be dropped in any order; the innermost live scope stays current.
//!
//! # Examples
//! ```
//! # use prosper::{scope, ExperimentConfig, Registry, Symbol, Variant};
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> prosper::Result<()> {
//! let greeting = Symbol::new("greeting");
//! let setup = {
//!     let greeting = greeting.clone();
//!     move || {
//!         Registry::new().with_experiment(
//!             ExperimentConfig::new("greeting")
//!                 .variant(Variant::new("control").with_pick(&greeting, "hello"))
//!                 .to_experiment()?,
//!         )
//!     }
//! };
//!
//! let value = scope::run(setup, |_registry| async move {
//!     prosper::pick::<String>(greeting).get_cloned()
//! })
//! .await?;
//! assert_eq!(value, "hello");
//! # Ok(())
//! # }
//! ```
use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use crate::{Registry, Result, ScopeError};

/// Entry ids handed out to guards. 0 marks an inherited entry that no guard owns.
static NEXT_ENTRY: AtomicU64 = AtomicU64::new(1);

/// Registries bound to one slot, innermost last, each tagged with the id of its entry.
#[derive(Clone, Default)]
struct Binding(Arc<Mutex<Vec<(u64, Arc<Registry>)>>>);

impl Binding {
    fn new(inherited: Option<Arc<Registry>>) -> Binding {
        let stack = inherited.map(|registry| (0, registry)).into_iter().collect();
        Binding(Arc::new(Mutex::new(stack)))
    }

    fn get(&self) -> Option<Arc<Registry>> {
        self.lock().last().map(|(_, registry)| registry.clone())
    }

    /// Returns the new entry's id and the resulting depth.
    fn push(&self, registry: Arc<Registry>) -> (u64, usize) {
        let entry = NEXT_ENTRY.fetch_add(1, Ordering::Relaxed);
        let mut stack = self.lock();
        stack.push((entry, registry));
        (entry, stack.len())
    }

    /// Remove `entry` wherever it is. Returns `true` if it was the innermost one.
    fn remove(&self, entry: u64) -> bool {
        let mut stack = self.lock();
        match stack.iter().rposition(|(id, _)| *id == entry) {
            Some(position) => {
                stack.remove(position);
                position == stack.len()
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(u64, Arc<Registry>)>> {
        self.0
            .lock()
            .expect("thread holding scope binding lock should not panic")
    }
}

tokio::task_local! {
    static TASK_BINDING: Binding;
}

thread_local! {
    static THREAD_BINDING: Binding = Binding::default();
}

/// The binding slot of the calling operation. `None` on a runtime thread outside of an isolated
/// task scope.
fn binding() -> Option<Binding> {
    match TASK_BINDING.try_with(Binding::clone) {
        Ok(binding) => Some(binding),
        Err(_) if tokio::runtime::Handle::try_current().is_err() => {
            Some(THREAD_BINDING.with(Binding::clone))
        }
        Err(_) => None,
    }
}

/// Builds the registry of a scope and cleans up after it.
///
/// Closures returning `Result<Registry>` implement this trait with a no-op teardown.
pub trait ScopeContext: Send + Sync + 'static {
    /// Create the registry to bind, e.g., by registering experiments for the current user.
    fn setup(&self) -> Result<Registry>;

    /// Called when the scope ends, while its registry is still bound.
    fn teardown(&self, _registry: &Registry) {}
}

impl<F> ScopeContext for F
where
    F: Fn() -> Result<Registry> + Send + Sync + 'static,
{
    fn setup(&self) -> Result<Registry> {
        self()
    }
}

type Teardown = Box<dyn FnOnce(&Registry) + Send + Sync>;

/// Keeps a registry bound until dropped.
///
/// Dropping the guard (or calling [`ScopeGuard::exit`]) runs the teardown hook and unbinds this
/// scope's registry. Scopes entered earlier and still alive stay bound.
#[must_use = "the scope ends as soon as the guard is dropped"]
pub struct ScopeGuard {
    binding: Binding,
    registry: Arc<Registry>,
    entry: u64,
    teardown: Option<Teardown>,
}

impl ScopeGuard {
    fn bind(binding: Binding, registry: Arc<Registry>, teardown: Option<Teardown>) -> ScopeGuard {
        let (entry, depth) = binding.push(registry.clone());
        log::trace!(target: "prosper", entry, depth; "entered scope");
        ScopeGuard {
            binding,
            registry,
            entry,
            teardown,
        }
    }

    /// The registry bound by this scope.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run `teardown` when the scope ends. Replaces any previously set hook.
    pub fn on_exit(mut self, teardown: impl FnOnce(&Registry) + Send + Sync + 'static) -> Self {
        self.teardown = Some(Box::new(teardown));
        self
    }

    /// End the scope now.
    pub fn exit(self) {
        drop(self);
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown(&self.registry);
        }
        let innermost = self.binding.remove(self.entry);
        log::trace!(target: "prosper", entry = self.entry, innermost; "exited scope");
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("registry", &self.registry)
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

/// Build a registry with `context` and bind it to the calling operation.
///
/// # Errors
///
/// - Errors from [`ScopeContext::setup`].
/// - [`ScopeError::NotIsolated`] when called on a runtime thread outside of [`isolated`]. The
///   context is not set up in that case.
pub fn enter(context: impl ScopeContext) -> Result<ScopeGuard> {
    let binding = binding().ok_or(ScopeError::NotIsolated)?;
    let registry = Arc::new(context.setup()?);
    Ok(ScopeGuard::bind(
        binding,
        registry,
        Some(Box::new(move |registry: &Registry| context.teardown(registry))),
    ))
}

/// Like [`enter`], with a one-off setup function. Use [`ScopeGuard::on_exit`] to add a teardown
/// hook.
pub fn enter_with(setup: impl FnOnce() -> Result<Registry>) -> Result<ScopeGuard> {
    let binding = binding().ok_or(ScopeError::NotIsolated)?;
    let registry = Arc::new(setup()?);
    Ok(ScopeGuard::bind(binding, registry, None))
}

/// Bind an existing, possibly shared, registry.
pub fn bind(registry: Arc<Registry>) -> Result<ScopeGuard> {
    let binding = binding().ok_or(ScopeError::NotIsolated)?;
    Ok(ScopeGuard::bind(binding, registry, None))
}

/// The registry bound to the calling operation.
///
/// # Errors
///
/// [`ScopeError::NoActiveScope`] if nothing is bound.
pub fn current() -> Result<Arc<Registry>> {
    binding()
        .and_then(|binding| binding.get())
        .ok_or_else(|| ScopeError::NoActiveScope.into())
}

/// Run `future` with its own binding slot.
///
/// The slot starts out with the caller's current registry (if any). Scopes entered inside
/// `future` are invisible to every other task.
pub async fn isolated<F: Future>(future: F) -> F::Output {
    let binding = Binding::new(current().ok());
    TASK_BINDING.scope(binding, future).await
}

/// Wrap one unit of async work in a scope: set up `context`, run `body` with the registry bound
/// across all of its suspension points, then tear down.
///
/// The scope is isolated from concurrently running tasks. Teardown also runs if `body` fails or
/// the returned future is dropped before completion.
pub async fn run<C, F, Fut, T>(context: C, body: F) -> Result<T>
where
    C: ScopeContext,
    F: FnOnce(Arc<Registry>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    isolated(async move {
        let guard = enter(context)?;
        let output = body(guard.registry().clone()).await;
        guard.exit();
        output
    })
    .await
}

/// Synchronous counterpart of [`run`].
///
/// Works both inside and outside of a runtime.
pub fn run_sync<C, F, T>(context: C, body: F) -> Result<T>
where
    C: ScopeContext,
    F: FnOnce(&Arc<Registry>) -> Result<T>,
{
    let binding = Binding::new(current().ok());
    TASK_BINDING.sync_scope(binding, || {
        let guard = enter(context)?;
        let output = body(guard.registry());
        guard.exit();
        output
    })
}

/// Spawn a tokio task that starts out bound to the caller's current registry.
///
/// Tasks spawned with [`tokio::spawn`] do not inherit any binding.
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let binding = Binding::new(current().ok());
    tokio::spawn(TASK_BINDING.scope(binding, future))
}
