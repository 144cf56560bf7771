//! Shared attribute sentinel for cascading ownership changes.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Shared handle to an attribute sentinel.
pub type SentinelRef = Rc<RefCell<AttributeSentinel>>;

/// Records attribute revisions on a data structure and cascades them to its
/// owners.
///
/// When a structure changes in a way its owners must observe (freezing,
/// re-tracking), the revision of its sentinel and of every transitive parent
/// is bumped. Parents are held weakly; a dropped owner falls out of the
/// cascade.
#[derive(Default)]
pub struct AttributeSentinel {
    revision: u64,
    parents: Vec<Weak<RefCell<AttributeSentinel>>>,
}

impl AttributeSentinel {
    pub fn new_ref() -> SentinelRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// Register `parent` as an owner of `child` and bump the parent chain so it
/// observes the adoption.
pub fn add_parent(child: &SentinelRef, parent: &SentinelRef) {
    if Rc::ptr_eq(child, parent) {
        return;
    }
    child.borrow_mut().parents.push(Rc::downgrade(parent));
    invalidate_all(parent);
}

/// Bump the revision of `sentinel` and of every transitive parent still
/// alive. Cycle-safe: each sentinel is visited once.
pub fn invalidate_all(sentinel: &SentinelRef) {
    let mut stack = vec![sentinel.clone()];
    let mut seen: Vec<*const RefCell<AttributeSentinel>> = Vec::new();
    while let Some(current) = stack.pop() {
        let ptr = Rc::as_ptr(&current);
        if seen.contains(&ptr) {
            continue;
        }
        seen.push(ptr);
        let mut inner = current.borrow_mut();
        inner.revision += 1;
        inner.parents.retain(|weak| weak.strong_count() > 0);
        for weak in &inner.parents {
            if let Some(parent) = weak.upgrade() {
                stack.push(parent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidate_cascades_to_parents() {
        let child = AttributeSentinel::new_ref();
        let parent = AttributeSentinel::new_ref();
        let grandparent = AttributeSentinel::new_ref();

        add_parent(&child, &parent);
        add_parent(&parent, &grandparent);

        let before = grandparent.borrow().revision();
        invalidate_all(&child);

        assert!(child.borrow().revision() > 0);
        assert!(parent.borrow().revision() > 0);
        assert!(grandparent.borrow().revision() > before);
    }

    #[test]
    fn test_cyclic_parents_terminate() {
        let a = AttributeSentinel::new_ref();
        let b = AttributeSentinel::new_ref();

        add_parent(&a, &b);
        add_parent(&b, &a);

        invalidate_all(&a);
        invalidate_all(&b);
    }

    #[test]
    fn test_dropped_parents_fall_out() {
        let child = AttributeSentinel::new_ref();
        {
            let parent = AttributeSentinel::new_ref();
            add_parent(&child, &parent);
        }
        invalidate_all(&child);
        assert!(child.borrow().parents.is_empty());
    }
}
