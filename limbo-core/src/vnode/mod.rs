//! Descriptions
//!
//! A description is the immutable value a caller hands to
//! [`Runtime::render`](crate::reconciler::Runtime::render): an element with a
//! type, key, props and children, a text leaf, or a list of those. Fibers
//! are built from descriptions but outlive them.
//!
//! The builders here are deliberately thin; they exist so descriptions can
//! be written without a macro layer:
//!
//! ```rust,ignore
//! let list = h("ul").children(items.iter().map(|item| {
//!     h("li").key(item.id.to_string()).child(text(&item.label))
//! }));
//! ```

mod props;

use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::error::RenderError;
use crate::hooks::RenderScope;

pub use props::{Listener, NodeRef, PropValue, Props};

/// Caller-supplied sibling identity.
pub type Key = String;

/// Signature of a component render function.
pub type RenderFn = dyn Fn(&mut RenderScope<'_>) -> Result<Node, RenderError>;

/// A component: a named render function. Two components are the same type
/// only if they share the same function allocation, so clone a `Component`
/// rather than building it twice.
#[derive(Clone)]
pub struct Component {
    name: Cow<'static, str>,
    render: Rc<RenderFn>,
}

impl Component {
    pub fn new<F>(name: impl Into<Cow<'static, str>>, render: F) -> Self
    where
        F: Fn(&mut RenderScope<'_>) -> Result<Node, RenderError> + 'static,
    {
        Self {
            name: name.into(),
            render: Rc::new(render),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn same_type(&self, other: &Component) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.render), Rc::as_ptr(&other.render))
    }

    pub(crate) fn render(&self, scope: &mut RenderScope<'_>) -> Result<Node, RenderError> {
        (self.render)(scope)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Component").field(&self.name).finish()
    }
}

/// What an element renders as.
#[derive(Debug, Clone)]
pub enum ElementKind {
    /// A host element such as `div`.
    Host(Cow<'static, str>),
    Component(Component),
}

/// Shared child list of an element. Cloning is free; equality used by the
/// props-skip check is identity.
#[derive(Debug, Clone, Default)]
pub struct Children(Rc<Vec<Node>>);

impl Children {
    pub fn as_slice(&self) -> &[Node] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn shallow_eq(&self, other: &Children) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || (self.0.is_empty() && other.0.is_empty())
    }

    fn push(&mut self, node: Node) {
        Rc::make_mut(&mut self.0).push(node);
    }
}

impl From<Vec<Node>> for Children {
    fn from(nodes: Vec<Node>) -> Self {
        Self(Rc::new(nodes))
    }
}

/// An element description.
#[derive(Debug, Clone)]
pub struct Element {
    pub(crate) kind: ElementKind,
    pub(crate) key: Option<Key>,
    pub(crate) props: Props,
    pub(crate) children: Children,
    pub(crate) node_ref: Option<NodeRef>,
}

impl Element {
    pub fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            key: None,
            props: Props::new(),
            children: Children::default(),
            node_ref: None,
        }
    }

    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    pub fn key_ref(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    pub fn child_nodes(&self) -> &Children {
        &self.children
    }

    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn prop(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.set(name, value);
        self
    }

    /// Attach an event handler; stored as the `on<event>` prop.
    pub fn on<F>(mut self, event: &str, handler: F) -> Self
    where
        F: Fn(&Value) + 'static,
    {
        self.props
            .set(format!("on{event}"), PropValue::Listener(Listener::new(handler)));
        self
    }

    pub fn node_ref(mut self, node_ref: NodeRef) -> Self {
        self.node_ref = Some(node_ref);
        self
    }

    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children<I, N>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Node>,
    {
        for child in children {
            self.children.push(child.into());
        }
        self
    }
}

/// One node of a description tree.
#[derive(Debug, Clone, Default)]
pub enum Node {
    Element(Element),
    Text(String),
    /// A child list. Lists may nest one level inside another list.
    Fragment(Vec<Node>),
    /// Renders nothing; occupies no fiber.
    #[default]
    Empty,
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Self::Element(element)
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<Node>> for Node {
    fn from(nodes: Vec<Node>) -> Self {
        Self::Fragment(nodes)
    }
}

impl<T: Into<Node>> From<Option<T>> for Node {
    fn from(node: Option<T>) -> Self {
        node.map_or(Node::Empty, Into::into)
    }
}

/// A host element description.
pub fn h(tag: impl Into<Cow<'static, str>>) -> Element {
    Element::new(ElementKind::Host(tag.into()))
}

/// A description that renders `component`.
pub fn component(component: &Component) -> Element {
    Element::new(ElementKind::Component(component.clone()))
}

/// A text leaf.
pub fn text(value: impl fmt::Display) -> Node {
    Node::Text(value.to_string())
}

/// A child list.
pub fn fragment<I, N>(nodes: I) -> Node
where
    I: IntoIterator<Item = N>,
    N: Into<Node>,
{
    Node::Fragment(nodes.into_iter().map(Into::into).collect())
}

/// Copy of `element` with `props` merged over its own.
pub fn clone_element(element: &Element, props: &Props) -> Element {
    Element {
        props: element.props.merged(props),
        ..element.clone()
    }
}
