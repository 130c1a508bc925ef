//! Typed, read-only accessors for pick values.
use std::{any::Any, fmt, marker::PhantomData, sync::Arc};

use crate::{scope, Error, PickValue, Registry, Result, Symbol};

type Resolver = Arc<dyn Fn() -> Result<PickValue> + Send + Sync>;

/// A read-only handle to the value of one pick symbol.
///
/// The value is resolved again on every [`Pick::get`], so the same accessor serves whatever the
/// current scope (or a refreshed experiment) provides at the time of the read. Accessors are cheap
/// to clone and are usually created once, e.g., in a `static` or a struct field.
///
/// # Examples
/// ```
/// # use prosper::{scope, ExperimentConfig, Pick, Registry, Symbol, Variant};
/// let limit = Symbol::new("page_size");
/// let page_size: Pick<i64> = prosper::pick(limit.clone());
///
/// let guard = scope::enter_with(|| {
///     Registry::new().with_experiment(
///         ExperimentConfig::new("paging")
///             .variant(Variant::new("control").with_pick(&limit, 20i64))
///             .to_experiment()?,
///     )
/// })?;
/// assert_eq!(*page_size.get()?, 20);
/// guard.exit();
///
/// assert!(page_size.get().is_err());
/// # Ok::<(), prosper::Error>(())
/// ```
pub struct Pick<T> {
    symbol: Symbol,
    resolver: Resolver,
    _type: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> Pick<T> {
    /// Create an accessor that resolves through `resolver`.
    pub fn new(
        symbol: Symbol,
        resolver: impl Fn() -> Result<PickValue> + Send + Sync + 'static,
    ) -> Pick<T> {
        Pick {
            symbol,
            resolver: Arc::new(resolver),
            _type: PhantomData,
        }
    }

    /// Create an accessor that resolves `symbol` in the registry of the current scope.
    pub fn from_scope(symbol: Symbol) -> Pick<T> {
        let lookup = symbol.clone();
        Pick::new(symbol, move || scope::current()?.resolve(&lookup))
    }

    /// Create an accessor that always resolves `symbol` in `registry`.
    pub fn from_registry(registry: Arc<Registry>, symbol: Symbol) -> Pick<T> {
        let lookup = symbol.clone();
        Pick::new(symbol, move || registry.resolve(&lookup))
    }

    /// Resolve the current value.
    ///
    /// # Errors
    ///
    /// - Any error of the resolver, e.g., [`ScopeError::NoActiveScope`] or
    ///   [`ValidationError::PickNotFound`].
    /// - [`Error::TypeMismatch`] if the value is not a `T`.
    ///
    /// [`ScopeError::NoActiveScope`]: crate::ScopeError::NoActiveScope
    /// [`ValidationError::PickNotFound`]: crate::ValidationError::PickNotFound
    pub fn get(&self) -> Result<Arc<T>> {
        downcast(&self.symbol, (self.resolver)()?)
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }
}

impl<T: Any + Send + Sync + Clone> Pick<T> {
    /// Like [`Pick::get`], returning an owned copy of the value.
    pub fn get_cloned(&self) -> Result<T> {
        self.get().map(|value| T::clone(&value))
    }
}

impl<T> Clone for Pick<T> {
    fn clone(&self) -> Self {
        Pick {
            symbol: self.symbol.clone(),
            resolver: self.resolver.clone(),
            _type: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Pick<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pick")
            .field("symbol", &self.symbol)
            .field("type", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

/// Create an accessor for `symbol` bound to the current scope.
///
/// Shorthand for [`Pick::from_scope`].
pub fn pick<T: Any + Send + Sync>(symbol: Symbol) -> Pick<T> {
    Pick::from_scope(symbol)
}

pub(crate) fn downcast<T: Any + Send + Sync>(symbol: &Symbol, value: PickValue) -> Result<Arc<T>> {
    value.downcast::<T>().ok_or_else(|| {
        log::warn!(target: "prosper",
                   symbol,
                   expected = std::any::type_name::<T>(),
                   found = value.type_name();
                   "pick has unexpected type");
        Error::TypeMismatch {
            symbol: symbol.clone(),
            expected: std::any::type_name::<T>(),
            found: value.type_name(),
        }
    })
}
