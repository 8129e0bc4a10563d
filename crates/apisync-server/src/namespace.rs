//! Namespace tree and the one-time mount walk.
//!
//! A [`Namespace`] is built once at startup. [`mount`] walks it depth-first,
//! assigns every signal and state its dotted key, records each leaf in the
//! [`Schema`], and indexes states for current-value lookups.

use std::collections::BTreeMap;
use std::sync::Arc;

use apisync_core::key::{DEPENDENCY_SEPARATOR, PATH_SEPARATOR, join_path};
use apisync_core::{LeafKind, Schema};
use serde::Serialize;
use tracing::debug;

use crate::errors::NamespaceError;
use crate::procedure::Procedure;
use crate::state::signal::SignalCore;
use crate::state::{Signal, State, StateRegistry, StateSource};
use crate::websocket::registry::ConnectionRegistry;

/// One child of a namespace.
pub(crate) enum Node {
    Namespace(Namespace),
    Procedure(Arc<dyn Procedure>),
    Signal(Arc<SignalCore>),
    State {
        core: Arc<SignalCore>,
        source: Arc<dyn StateSource>,
    },
}

impl Node {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Self::Namespace(_) => "namespace",
            Self::Procedure(_) => LeafKind::Function.as_str(),
            Self::Signal(_) => LeafKind::Signal.as_str(),
            Self::State { .. } => LeafKind::State.as_str(),
        }
    }
}

/// Hierarchical declaration of procedures, signals and states.
///
/// ```ignore
/// let count: State<u32> = State::new();
/// let api = Namespace::new()
///     .nest("math", Namespace::new().procedure("add", add))
///     .nest("room", Namespace::new().state("count", &count));
/// ```
#[derive(Default)]
pub struct Namespace {
    children: BTreeMap<String, Node>,
    duplicates: Vec<String>,
}

impl Namespace {
    /// Create an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a procedure.
    #[must_use]
    pub fn procedure(self, name: impl Into<String>, procedure: impl Procedure + 'static) -> Self {
        self.insert(name.into(), Node::Procedure(Arc::new(procedure)))
    }

    /// Add a signal.
    #[must_use]
    pub fn signal<T>(self, name: impl Into<String>, signal: &Signal<T>) -> Self {
        self.insert(name.into(), Node::Signal(signal.core().clone()))
    }

    /// Add a state.
    #[must_use]
    pub fn state<T>(self, name: impl Into<String>, state: &State<T>) -> Self
    where
        T: Serialize + Send + 'static,
    {
        let node = Node::State {
            core: state.signal().core().clone(),
            source: Arc::new(state.clone()),
        };
        self.insert(name.into(), node)
    }

    /// Add a custom state: `source` answers current-value lookups and
    /// `signal` carries its updates.
    #[must_use]
    pub fn source<T>(
        self,
        name: impl Into<String>,
        signal: &Signal<T>,
        source: impl StateSource + 'static,
    ) -> Self {
        let node = Node::State {
            core: signal.core().clone(),
            source: Arc::new(source),
        };
        self.insert(name.into(), node)
    }

    /// Add a nested namespace.
    #[must_use]
    pub fn nest(self, name: impl Into<String>, namespace: Namespace) -> Self {
        self.insert(name.into(), Node::Namespace(namespace))
    }

    fn insert(mut self, name: String, node: Node) -> Self {
        if self.children.contains_key(&name) {
            self.duplicates.push(name.clone());
        }
        let _ = self.children.insert(name, node);
        self
    }

    pub(crate) fn child(&self, name: &str) -> Option<&Node> {
        self.children.get(name)
    }

    /// Number of direct children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether the namespace has no children.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Output of the mount walk.
pub(crate) struct Mounted {
    pub(crate) schema: Schema,
    pub(crate) states: StateRegistry,
}

/// Walk `root`, bind every signal to `connections`, and build the schema.
pub(crate) fn mount(root: &Namespace, connections: &Arc<ConnectionRegistry>) -> Result<Mounted, NamespaceError> {
    let mut mounted = Mounted {
        schema: Schema::new(),
        states: StateRegistry::new(),
    };
    let mut prefix = Vec::new();
    walk(root, &mut prefix, connections, &mut mounted)?;
    debug!(leaves = mounted.schema.len(), states = mounted.states.len(), "namespace mounted");
    Ok(mounted)
}

fn walk(
    namespace: &Namespace,
    prefix: &mut Vec<String>,
    connections: &Arc<ConnectionRegistry>,
    out: &mut Mounted,
) -> Result<(), NamespaceError> {
    if let Some(name) = namespace.duplicates.first() {
        prefix.push(name.clone());
        return Err(NamespaceError::Duplicate {
            path: join_path(prefix),
        });
    }

    for (name, node) in &namespace.children {
        if !is_valid_name(name) {
            return Err(NamespaceError::InvalidName { name: name.clone() });
        }
        prefix.push(name.clone());
        let path = join_path(prefix);

        match node {
            Node::Namespace(inner) => walk(inner, prefix, connections, out)?,
            Node::Procedure(_) => {
                let _ = out.schema.insert(path, LeafKind::Function);
            }
            Node::Signal(core) => {
                core.bind(&path, connections)?;
                let _ = out.schema.insert(path, LeafKind::Signal);
            }
            Node::State { core, source } => {
                core.bind(&path, connections)?;
                out.states.insert(path.clone(), source.clone());
                let _ = out.schema.insert(path, LeafKind::State);
            }
        }

        let _ = prefix.pop();
    }
    Ok(())
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(PATH_SEPARATOR) && !name.contains(DEPENDENCY_SEPARATOR)
}
