//! Transparent value proxy.

use std::fmt;
use std::ops::Deref;

/// Read-transparent wrapper around an owned target value.
///
/// Every read on the proxy resolves exactly as on the target via `Deref`;
/// equality also delegates to the target. There is intentionally no
/// `DerefMut`: mutation must go through the owning wrapper's intercepted
/// operations, which borrow the target with [`Proxy::target_mut`]. Inherent
/// methods declared on the owning wrapper shadow delegated methods of the
/// same name, so wrapper-level accessors always resolve against the wrapper,
/// never the target. Wrapper bookkeeping lives in sibling fields, namespaced
/// apart from the target's own content.
pub struct Proxy<T> {
    target: T,
}

impl<T> Proxy<T> {
    pub fn new(target: T) -> Self {
        Self { target }
    }

    /// Shared access to the wrapped target.
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Mutable access for intercepted operations only.
    pub(crate) fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    /// Unwrap, discarding the proxy.
    pub fn into_inner(self) -> T {
        self.target
    }
}

impl<T> Deref for Proxy<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.target
    }
}

impl<T: Default> Default for Proxy<T> {
    fn default() -> Self {
        Self {
            target: T::default(),
        }
    }
}

impl<T: PartialEq> PartialEq for Proxy<T> {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target
    }
}

impl<T: PartialEq> PartialEq<T> for Proxy<T> {
    fn eq(&self, other: &T) -> bool {
        self.target == *other
    }
}

impl<T: fmt::Debug> fmt::Debug for Proxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.target.fmt(f)
    }
}
