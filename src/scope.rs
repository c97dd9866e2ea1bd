//! Persistent scope chains
//!
//! A `Scope` is a singly linked list of frames shared through `Rc`. Cloning a
//! scope is cheap and the clone is unaffected by later changes to the
//! original: every mutation goes through `Rc::make_mut`, so a frame is copied
//! only when someone else still holds it. `set` rebuilds the frames between
//! the innermost one and the frame that owns the binding; frames above the
//! owner stay shared.
//!
//! The payload `T` is whatever the walker needs: runtime bindings for the
//! analyzer, usage bookkeeping for the validator.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::Ident;
use crate::error::{Result, VortexError};

/// A binding: the identifier that created it plus its payload.
#[derive(Debug, Clone)]
pub struct Entry<T> {
    pub origin: Ident,
    pub data: T,
}

#[derive(Debug, Clone)]
struct Frame<T> {
    vars: FxHashMap<String, Entry<T>>,
    parent: Option<Rc<Frame<T>>>,
}

/// A scope chain. The root has no frames; `push` before adding bindings.
#[derive(Debug, Clone)]
pub struct Scope<T> {
    head: Option<Rc<Frame<T>>>,
}

impl<T> Default for Scope<T> {
    fn default() -> Self {
        Scope { head: None }
    }
}

impl<T: Clone> Scope<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new empty frame.
    pub fn push(&mut self) {
        let parent = self.head.take();
        self.head = Some(Rc::new(Frame {
            vars: FxHashMap::default(),
            parent,
        }));
    }

    /// Discard the innermost frame.
    pub fn pop(&mut self) -> Result<()> {
        let frame = self
            .head
            .take()
            .ok_or_else(|| VortexError::internal("attempt to pop the root scope"))?;
        self.head = frame.parent.clone();
        Ok(())
    }

    /// Bind `origin.name` in the innermost frame. Shadowing and duplicate
    /// detection are the caller's business.
    pub fn add(&mut self, origin: Ident, data: T) -> Result<()> {
        let head = self
            .head
            .as_mut()
            .ok_or_else(|| {
                VortexError::internal(format!("add '{}' to the root scope", origin.name))
            })?;
        let name = origin.name.clone();
        Rc::make_mut(head).vars.insert(name, Entry { origin, data });
        Ok(())
    }

    /// Look `name` up, innermost frame first.
    pub fn get(&self, name: &str) -> Option<&Entry<T>> {
        let mut frame = self.head.as_deref();
        while let Some(f) = frame {
            if let Some(entry) = f.vars.get(name) {
                return Some(entry);
            }
            frame = f.parent.as_deref();
        }
        None
    }

    /// Like `get`, also returning how many frames out the binding lives
    /// (0 = innermost).
    pub fn get_with_distance(&self, name: &str) -> Option<(&Entry<T>, usize)> {
        let mut frame = self.head.as_deref();
        let mut distance = 0;
        while let Some(f) = frame {
            if let Some(entry) = f.vars.get(name) {
                return Some((entry, distance));
            }
            frame = f.parent.as_deref();
            distance += 1;
        }
        None
    }

    /// The scope as it was `distance` frames out from the innermost.
    pub fn outer(&self, distance: usize) -> Scope<T> {
        let mut head = self.head.clone();
        for _ in 0..distance {
            head = head.and_then(|f| f.parent.clone());
        }
        Scope { head }
    }

    /// Update the binding of `name` in the frame that owns it. A missing name
    /// is an internal fault: creation checks should have rejected the
    /// program first.
    pub fn set(&mut self, name: &str, update: impl FnOnce(&mut T)) -> Result<()> {
        if self.get(name).is_none() {
            return Err(VortexError::internal(format!(
                "attempt to set '{}' which does not exist",
                name
            )));
        }

        let mut frame = self.head.as_mut();
        while let Some(rc) = frame {
            let f = Rc::make_mut(rc);
            if let Some(entry) = f.vars.get_mut(name) {
                update(&mut entry.data);
                return Ok(());
            }
            frame = f.parent.as_mut();
        }

        Err(VortexError::internal(format!("lost binding '{}'", name)))
    }

    /// Number of frames.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut frame = self.head.as_deref();
        while let Some(f) = frame {
            depth += 1;
            frame = f.parent.as_deref();
        }
        depth
    }

    /// Bindings of the innermost frame, in no particular order.
    pub fn innermost(&self) -> impl Iterator<Item = &Entry<T>> {
        self.head.iter().flat_map(|f| f.vars.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Span;

    fn ident(name: &str) -> Ident {
        Ident::new(name, Span::default())
    }

    #[test]
    fn test_get_walks_outward() {
        let mut scope = Scope::new();
        scope.push();
        scope.add(ident("x"), 1).unwrap();
        scope.push();
        scope.add(ident("y"), 2).unwrap();

        assert_eq!(scope.get("x").map(|e| e.data), Some(1));
        assert_eq!(scope.get_with_distance("x").map(|(_, d)| d), Some(1));
        assert_eq!(scope.get("y").map(|e| e.data), Some(2));
        assert!(scope.get("z").is_none());

        scope.pop().unwrap();
        assert!(scope.get("y").is_none());
        assert_eq!(scope.depth(), 1);
    }

    #[test]
    fn test_set_is_copy_on_write() {
        let mut scope = Scope::new();
        scope.push();
        scope.add(ident("x"), 1).unwrap();
        scope.push();

        let snapshot = scope.clone();
        scope.set("x", |v| *v = 10).unwrap();

        assert_eq!(scope.get("x").map(|e| e.data), Some(10));
        assert_eq!(snapshot.get("x").map(|e| e.data), Some(1));
    }

    #[test]
    fn test_add_does_not_leak_into_snapshot() {
        let mut scope = Scope::new();
        scope.push();
        let snapshot = scope.clone();
        scope.add(ident("x"), 1).unwrap();
        assert!(snapshot.get("x").is_none());
        assert!(scope.get("x").is_some());
    }

    #[test]
    fn test_outer_drops_inner_frames() {
        let mut scope = Scope::new();
        scope.push();
        scope.add(ident("x"), 1).unwrap();
        scope.push();
        scope.add(ident("y"), 2).unwrap();

        let outer = scope.outer(1);
        assert_eq!(outer.depth(), 1);
        assert!(outer.get("y").is_none());
        assert_eq!(outer.get("x").map(|e| e.data), Some(1));
        assert_eq!(scope.outer(5).depth(), 0);
    }

    #[test]
    fn test_set_missing_name_is_internal_error() {
        let mut scope: Scope<i32> = Scope::new();
        scope.push();
        assert!(matches!(scope.set("nope", |_| {}), Err(VortexError::Internal(_))));
    }

    #[test]
    fn test_root_cannot_be_popped_or_added_to() {
        let mut scope: Scope<i32> = Scope::new();
        assert!(scope.pop().is_err());
        assert!(scope.add(ident("x"), 1).is_err());
    }
}
