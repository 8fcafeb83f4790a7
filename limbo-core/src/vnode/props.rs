//! Props
//!
//! Props are an ordered map from attribute name to value. Plain values are
//! `serde_json::Value`s; event handlers are [`Listener`]s compared by
//! identity. The map sits behind an `Rc` so fibers can snapshot their
//! previous props for free.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::host::HostNode;

/// An event handler attached to a host element.
#[derive(Clone)]
pub struct Listener(Rc<dyn Fn(&Value)>);

impl Listener {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Value) + 'static,
    {
        Self(Rc::new(handler))
    }

    /// Invoke the handler with an event payload.
    pub fn call(&self, event: &Value) {
        (self.0)(event)
    }

    /// Whether both listeners wrap the same closure.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Rc::as_ptr(&self.0))
    }
}

/// A single prop value.
#[derive(Debug, Clone)]
pub enum PropValue {
    Value(Value),
    Listener(Listener),
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Value(a), Self::Value(b)) => a == b,
            (Self::Listener(a), Self::Listener(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

macro_rules! prop_value_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for PropValue {
                fn from(value: $ty) -> Self {
                    Self::Value(value.into())
                }
            }
        )*
    };
}

prop_value_from!(Value, &str, String, bool, i32, i64, u32, u64, f64);

impl From<Listener> for PropValue {
    fn from(listener: Listener) -> Self {
        Self::Listener(listener)
    }
}

/// Ordered, cheaply cloneable prop map.
#[derive(Debug, Clone, Default)]
pub struct Props(Rc<IndexMap<String, PropValue>>);

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.0.get(name)
    }

    /// The plain value stored under `name`, if it is not a listener.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.0.get(name) {
            Some(PropValue::Value(value)) => Some(value),
            _ => None,
        }
    }

    pub fn listener(&self, name: &str) -> Option<&Listener> {
        match self.0.get(name) {
            Some(PropValue::Listener(listener)) => Some(listener),
            _ => None,
        }
    }

    /// Insert or replace a prop. Copies the map only if it is shared.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<PropValue>) {
        Rc::make_mut(&mut self.0).insert(name.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// A copy of `self` with every entry of `overrides` applied on top.
    pub fn merged(&self, overrides: &Props) -> Props {
        let mut merged = self.clone();
        for (name, value) in overrides.iter() {
            merged.set(name, value.clone());
        }
        merged
    }

    /// Shallow equality: same entries, values compared one level deep and
    /// listeners by identity.
    pub fn shallow_eq(&self, other: &Props) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .all(|(name, value)| other.0.get(name) == Some(value))
    }

    /// Entries that differ between `old` and `new`, in `old ∪ new` order.
    /// `None` marks a prop that was removed.
    pub fn changes<'a>(old: Option<&'a Props>, new: &'a Props) -> Vec<(&'a str, Option<&'a PropValue>)> {
        let mut changes = Vec::new();
        if let Some(old) = old {
            for (name, value) in old.iter() {
                match new.get(name) {
                    Some(next) if next == value => {}
                    next => changes.push((name, next)),
                }
            }
        }
        for (name, value) in new.iter() {
            let seen = old.is_some_and(|old| old.get(name).is_some());
            if !seen {
                changes.push((name, Some(value)));
            }
        }
        changes
    }
}

impl<K, V> FromIterator<(K, V)> for Props
where
    K: Into<String>,
    V: Into<PropValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(Rc::new(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        ))
    }
}

/// A slot or callback that receives the host node of a committed element.
#[derive(Clone)]
pub enum NodeRef {
    Slot(Rc<Cell<Option<HostNode>>>),
    Callback(Rc<dyn Fn(Option<HostNode>)>),
}

impl NodeRef {
    /// A fresh, empty slot.
    pub fn new() -> Self {
        Self::Slot(Rc::new(Cell::new(None)))
    }

    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(Option<HostNode>) + 'static,
    {
        Self::Callback(Rc::new(callback))
    }

    /// The node currently held by a slot ref. Always `None` for callbacks.
    pub fn current(&self) -> Option<HostNode> {
        match self {
            Self::Slot(slot) => slot.get(),
            Self::Callback(_) => None,
        }
    }

    /// Whether both refs point at the same slot or callback.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Slot(a), Self::Slot(b)) => Rc::ptr_eq(a, b),
            (Self::Callback(a), Self::Callback(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
            _ => false,
        }
    }

    pub(crate) fn set(&self, node: Option<HostNode>) {
        match self {
            Self::Slot(slot) => slot.set(node),
            Self::Callback(callback) => callback(node),
        }
    }
}

impl Default for NodeRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slot(slot) => f.debug_tuple("Slot").field(&slot.get()).finish(),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}
