use serde::{Deserialize, Serialize};

use crate::{heap::HeapId, value::Value};

/// Index of a variable slot within a namespace, or of a namespace within [`Namespaces`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub(crate) struct NamespaceId(u32);

impl NamespaceId {
    pub fn new(index: usize) -> Self {
        Self(index.try_into().expect("Invalid namespace id"))
    }

    /// Returns the raw index value.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index for the global (module-level) namespace in Namespaces.
/// At module level, the frame's namespace is the global namespace.
pub(crate) const GLOBAL_NS_IDX: NamespaceId = NamespaceId(0);

/// The variable slots of one scope. Unassigned slots hold `Value::Undefined`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Namespace(Vec<Value>);

impl Namespace {
    pub fn get(&self, slot: usize) -> Value {
        self.0[slot]
    }

    pub fn set(&mut self, slot: usize, value: Value) {
        self.0[slot] = value;
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.0.iter()
    }
}

/// Storage for all namespaces during execution.
///
/// Frames refer to their namespace by index instead of holding references, so the VM
/// only ever needs one mutable borrow at a time. Index 0 is always the global
/// (module-level) namespace; each function call pushes one namespace and pops it on
/// return.
///
/// Variables captured by closures live in heap cells referenced from the frame, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Namespaces {
    stack: Vec<Namespace>,
}

impl Namespaces {
    /// Creates namespaces with the global namespace initialized.
    pub fn new(globals: Vec<Value>) -> Self {
        Self {
            stack: vec![Namespace(globals)],
        }
    }

    /// # Panics
    /// Panics if `idx` is out of bounds.
    pub fn get(&self, idx: NamespaceId) -> &Namespace {
        &self.stack[idx.index()]
    }

    /// # Panics
    /// Panics if `idx` is out of bounds.
    pub fn get_mut(&mut self, idx: NamespaceId) -> &mut Namespace {
        &mut self.stack[idx.index()]
    }

    /// Creates a new namespace for a function call, returns its index.
    pub fn push(&mut self, namespace: Vec<Value>) -> NamespaceId {
        let idx = NamespaceId::new(self.stack.len());
        self.stack.push(Namespace(namespace));
        idx
    }

    /// Removes the most recently added namespace after its function returns.
    pub fn pop(&mut self) {
        debug_assert!(self.stack.len() > 1, "cannot pop global namespace");
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    /// Drops every function namespace, leaving only the globals.
    ///
    /// Used when an uncaught exception unwinds the whole call stack.
    pub fn truncate_to_global(&mut self) {
        self.stack.truncate(1);
    }

    /// Consumes the namespaces, returning the global slots.
    pub fn into_globals(mut self) -> Vec<Value> {
        self.stack.truncate(1);
        self.stack.pop().map(|ns| ns.0).unwrap_or_default()
    }

    /// Returns an iterator over all HeapIds referenced by values in all namespaces.
    ///
    /// These are garbage collection roots.
    pub fn iter_heap_ids(&self) -> impl Iterator<Item = HeapId> + '_ {
        self.stack
            .iter()
            .flat_map(|namespace| namespace.iter().filter_map(|value| value.heap_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_pop_function_namespaces() {
        let mut namespaces = Namespaces::new(vec![Value::Int(1)]);
        let idx = namespaces.push(vec![Value::Undefined; 2]);
        assert_eq!(idx.index(), 1);
        namespaces.get_mut(idx).set(1, Value::Int(5));
        assert!(matches!(namespaces.get(idx).get(1), Value::Int(5)));
        namespaces.pop();
        assert!(matches!(namespaces.get(GLOBAL_NS_IDX).get(0), Value::Int(1)));
        assert_eq!(namespaces.into_globals().len(), 1);
    }
}
