//! The pipeline message envelope and per-client context.
//!
//! [`Message`] is the sum type that flows through node queues. Nodes pattern
//! match on the variants they consume and must forward every other variant
//! unchanged; adding a variant must not require modifying intermediate
//! nodes.

use crate::correction::CorrectionAlignments;
use crate::read::SimplexRead;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// A template/complement read pair for duplex calling.
#[derive(Debug)]
pub struct DuplexReadPair {
    /// The template-strand read.
    pub template: SimplexRead,
    /// The complement-strand read.
    pub complement: SimplexRead,
}

/// The discriminated union carried by pipeline queues.
#[derive(Debug)]
pub enum Message {
    /// A simplex read.
    Read(Box<SimplexRead>),
    /// A duplex read pair.
    ReadPair(Box<DuplexReadPair>),
    /// Overlap alignments for the correction subsystem.
    CorrectionAlignments(Box<CorrectionAlignments>),
}

impl Message {
    /// A short description of the payload for logging.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Message::Read(read) => format!("read {}", read.read_id),
            Message::ReadPair(pair) => {
                format!("read pair {}/{}", pair.template.read_id, pair.complement.read_id)
            }
            Message::CorrectionAlignments(alignments) => {
                format!("correction alignments for {}", alignments.read_name)
            }
        }
    }
}

impl From<SimplexRead> for Message {
    fn from(read: SimplexRead) -> Self {
        Message::Read(Box::new(read))
    }
}

/// A typed context container keyed by type identity.
///
/// Collaborators install domain services (for example a polyA tail
/// calculator) before a read enters the node that needs them; the node
/// looks its dependency up by type and gracefully no-ops if absent.
/// Registered types may be trait objects.
#[derive(Default)]
pub struct ContextContainer {
    contexts: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ContextContainer {
    /// Register a context value under its type, replacing any previous one.
    pub fn register<T: ?Sized + Any + Send + Sync>(&mut self, value: Arc<T>) {
        self.contexts.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Look up a context value by type.
    #[must_use]
    pub fn get<T: ?Sized + Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.contexts
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<Arc<T>>())
            .map(Arc::clone)
    }

    /// Whether a context of the given type is registered.
    #[must_use]
    pub fn contains<T: ?Sized + Any + Send + Sync>(&self) -> bool {
        self.contexts.contains_key(&TypeId::of::<T>())
    }
}

impl std::fmt::Debug for ContextContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextContainer").field("len", &self.contexts.len()).finish()
    }
}

/// Per-client information attached to every read.
#[derive(Debug)]
pub struct ClientInfo {
    client_id: i32,
    contexts: ContextContainer,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self::new(-1)
    }
}

impl ClientInfo {
    /// Create client info with the given id.
    #[must_use]
    pub fn new(client_id: i32) -> Self {
        Self { client_id, contexts: ContextContainer::default() }
    }

    /// The client id, or -1 for the standalone tool.
    #[must_use]
    pub fn client_id(&self) -> i32 {
        self.client_id
    }

    /// The typed context container.
    #[must_use]
    pub fn contexts(&self) -> &ContextContainer {
        &self.contexts
    }

    /// Mutable access to the context container, for setup before reads flow.
    pub fn contexts_mut(&mut self) -> &mut ContextContainer {
        &mut self.contexts
    }
}
