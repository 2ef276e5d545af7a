//! Batched device tree mutations.
//!
//! A [Changeset] records entries against the tree without touching it.
//! [Changeset::apply] replays them in registration order and, if one fails,
//! reverts the ones it already applied so the tree is left as it was.
//! [Changeset::apply_partial] is the best-effort flavour that keeps whatever
//! was applied before the failing entry. Dropping a changeset releases every
//! payload it owns, applied or not; the tree keeps its own copies.

use crate::{
    error::DtError,
    node::{DeviceTree, Node, NodeFlags, NodeId},
    prop::Property,
};
use alloc::{boxed::Box, string::String, vec, vec::Vec};
use log::{debug, warn};
use utils::endian::{BigEndian32, EndianData};

/// A node an entry operates on: one already in the tree, or one created by
/// the changeset that registered the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    Live(NodeId),
    Pending(usize),
}

impl From<NodeId> for NodeRef {
    fn from(value: NodeId) -> Self {
        NodeRef::Live(value)
    }
}

#[derive(Debug)]
struct PendingNode {
    parent: NodeRef,
    full_name: Box<str>,
}

#[derive(Debug)]
enum Entry {
    CreateNode { pending: usize },
    AddProperty { node: NodeRef, prop: Property },
    UpdateProperty { node: NodeRef, prop: Property },
    RemoveProperty { node: NodeRef, name: Box<str> },
    AttachNode { node: NodeRef },
}

/// How to take an applied entry back.
enum Undo {
    Created(NodeId),
    Added(NodeId, Box<str>),
    Replaced(NodeId, Property),
    Removed(NodeId, usize, Property),
    Attached(NodeId),
}

#[derive(Debug, Default)]
pub struct Changeset {
    entries: Vec<Entry>,
    pending: Vec<PendingNode>,
    applied: bool,
}

fn owned_str(s: &str) -> Result<Box<str>, DtError> {
    let mut owned = String::new();
    owned
        .try_reserve_exact(s.len())
        .map_err(|_| DtError::AllocationFailure)?;
    owned.push_str(s);
    Ok(owned.into_boxed_str())
}

/// NUL-terminated payload of a single string property.
fn string_payload(s: &str) -> Result<Vec<u8>, DtError> {
    if s.as_bytes().contains(&0) {
        return Err(DtError::InvalidArgument);
    }
    let mut value = Vec::new();
    value
        .try_reserve_exact(s.len() + 1)
        .map_err(|_| DtError::AllocationFailure)?;
    value.extend_from_slice(s.as_bytes());
    value.push(0);
    Ok(value)
}

/// Concatenated NUL-terminated strings. Every entry is checked before
/// anything is allocated.
fn string_list_payload(strs: &[Option<&str>]) -> Result<Vec<u8>, DtError> {
    let mut total = 0;
    for s in strs {
        let s = s.ok_or(DtError::InvalidArgument)?;
        if s.as_bytes().contains(&0) {
            return Err(DtError::InvalidArgument);
        }
        total += s.len() + 1;
    }
    let mut value = Vec::new();
    value
        .try_reserve_exact(total)
        .map_err(|_| DtError::AllocationFailure)?;
    for s in strs.iter().flatten() {
        value.extend_from_slice(s.as_bytes());
        value.push(0);
    }
    Ok(value)
}

// region: registration

impl Changeset {
    /// An empty changeset.
    pub fn new() -> Changeset {
        Changeset::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register the creation of an empty node called `full_name` under `parent`.
    ///
    /// The node is dynamic and detached once applied; queue an
    /// [Changeset::attach_node] to link it into the tree.
    pub fn create_node(
        &mut self,
        parent: impl Into<NodeRef>,
        full_name: &str,
    ) -> Result<NodeRef, DtError> {
        if full_name.is_empty() || full_name.contains('/') {
            return Err(DtError::InvalidArgument);
        }
        let pending = self.pending.len();
        self.pending.push(PendingNode {
            parent: parent.into(),
            full_name: owned_str(full_name)?,
        });
        self.entries.push(Entry::CreateNode { pending });
        Ok(NodeRef::Pending(pending))
    }

    /// Register the insertion of a copy of `value` as a new property.
    ///
    /// Whether the name is already taken is only known when applying.
    pub fn add_property_copy(
        &mut self,
        node: impl Into<NodeRef>,
        name: &str,
        value: &[u8],
    ) -> Result<(), DtError> {
        let prop = Property::try_copy(name, value)?;
        self.entries.push(Entry::AddProperty {
            node: node.into(),
            prop,
        });
        Ok(())
    }

    /// Register a create-or-replace of property `name` with a copy of `value`.
    pub fn update_property_copy(
        &mut self,
        node: impl Into<NodeRef>,
        name: &str,
        value: &[u8],
    ) -> Result<(), DtError> {
        let prop = Property::try_copy(name, value)?;
        self.entries.push(Entry::UpdateProperty {
            node: node.into(),
            prop,
        });
        Ok(())
    }

    pub fn add_property_string(
        &mut self,
        node: impl Into<NodeRef>,
        name: &str,
        value: &str,
    ) -> Result<(), DtError> {
        self.add_property_copy(node, name, &string_payload(value)?)
    }

    pub fn update_property_string(
        &mut self,
        node: impl Into<NodeRef>,
        name: &str,
        value: &str,
    ) -> Result<(), DtError> {
        self.update_property_copy(node, name, &string_payload(value)?)
    }

    /// A `None` member is rejected with [DtError::InvalidArgument].
    pub fn add_property_string_list(
        &mut self,
        node: impl Into<NodeRef>,
        name: &str,
        strs: &[Option<&str>],
    ) -> Result<(), DtError> {
        self.add_property_copy(node, name, &string_list_payload(strs)?)
    }

    pub fn update_property_string_list(
        &mut self,
        node: impl Into<NodeRef>,
        name: &str,
        strs: &[Option<&str>],
    ) -> Result<(), DtError> {
        self.update_property_copy(node, name, &string_list_payload(strs)?)
    }

    /// `value` is stored big endian.
    pub fn add_property_u32(
        &mut self,
        node: impl Into<NodeRef>,
        name: &str,
        value: u32,
    ) -> Result<(), DtError> {
        self.add_property_copy(node, name, &BigEndian32::from_value(value).to_bytes())
    }

    pub fn update_property_u32(
        &mut self,
        node: impl Into<NodeRef>,
        name: &str,
        value: u32,
    ) -> Result<(), DtError> {
        self.update_property_copy(node, name, &BigEndian32::from_value(value).to_bytes())
    }

    /// Presence of the property means true; there is no way to store false.
    pub fn add_property_bool(&mut self, node: impl Into<NodeRef>, name: &str) -> Result<(), DtError> {
        self.add_property_copy(node, name, &[])
    }

    pub fn update_property_bool(
        &mut self,
        node: impl Into<NodeRef>,
        name: &str,
    ) -> Result<(), DtError> {
        self.update_property_copy(node, name, &[])
    }

    pub fn remove_property(&mut self, node: impl Into<NodeRef>, name: &str) -> Result<(), DtError> {
        let name = owned_str(name)?;
        self.entries.push(Entry::RemoveProperty {
            node: node.into(),
            name,
        });
        Ok(())
    }

    /// Register linking a node created by this changeset under its recorded parent.
    pub fn attach_node(&mut self, node: NodeRef) -> Result<(), DtError> {
        match node {
            NodeRef::Pending(idx) if idx < self.pending.len() => {
                self.entries.push(Entry::AttachNode { node });
                Ok(())
            }
            _ => Err(DtError::InvalidTarget),
        }
    }
}

// endregion

// region: apply

struct Resolver<'a> {
    pending: &'a [PendingNode],
    created: Vec<Option<NodeId>>,
}

impl Resolver<'_> {
    fn resolve(&self, tree: &DeviceTree, node: NodeRef) -> Result<NodeId, DtError> {
        match node {
            NodeRef::Live(id) => tree.node(id).map(|_| id).ok_or(DtError::NodeNotFound),
            NodeRef::Pending(idx) => self
                .created
                .get(idx)
                .copied()
                .flatten()
                .ok_or(DtError::InvalidTarget),
        }
    }

    fn apply_entry(&mut self, tree: &mut DeviceTree, entry: &Entry) -> Result<Undo, DtError> {
        match entry {
            Entry::CreateNode { pending } => {
                let nodes = self.pending;
                let node = &nodes[*pending];
                let parent = self.resolve(tree, node.parent)?;
                let id = NodeId(tree.container.len());
                tree.container.push(Node::new(
                    id,
                    Some(parent),
                    &node.full_name,
                    NodeFlags::DYNAMIC | NodeFlags::DETACHED,
                ));
                self.created[*pending] = Some(id);
                Ok(Undo::Created(id))
            }
            Entry::AddProperty { node, prop } => {
                let id = self.resolve(tree, *node)?;
                let copy = Property::try_copy(&prop.name, &prop.data)?;
                tree.container[id.0]
                    .props
                    .insert(copy)
                    .map_err(|_| DtError::DuplicateProperty)?;
                Ok(Undo::Added(id, prop.name.clone()))
            }
            Entry::UpdateProperty { node, prop } => {
                let id = self.resolve(tree, *node)?;
                let copy = Property::try_copy(&prop.name, &prop.data)?;
                Ok(match tree.container[id.0].props.replace(copy) {
                    Some(old) => Undo::Replaced(id, old),
                    None => Undo::Added(id, prop.name.clone()),
                })
            }
            Entry::RemoveProperty { node, name } => {
                let id = self.resolve(tree, *node)?;
                let (position, old) = tree.container[id.0]
                    .props
                    .remove(name)
                    .ok_or(DtError::PropertyNotFound)?;
                Ok(Undo::Removed(id, position, old))
            }
            Entry::AttachNode { node } => {
                let id = self.resolve(tree, *node)?;
                let target = &tree.container[id.0];
                if !target.flags.contains(NodeFlags::DETACHED) {
                    return Err(DtError::InvalidTarget);
                }
                let parent = target.parent_id.ok_or(DtError::InvalidTarget)?;
                let clash = tree
                    .get_children(parent)
                    .any(|child| child.full_name == target.full_name);
                if clash {
                    return Err(DtError::DuplicateNode);
                }
                tree.container[parent.0].children.push(id);
                let flags = &mut tree.container[id.0].flags;
                flags.remove(NodeFlags::DETACHED);
                flags.insert(NodeFlags::ATTACHED);
                Ok(Undo::Attached(id))
            }
        }
    }
}

impl Undo {
    fn revert(self, tree: &mut DeviceTree) {
        match self {
            // creations are reverted newest first, so the node is the tail
            Undo::Created(id) => {
                debug_assert_eq!(tree.container.len(), id.0 + 1);
                tree.container.truncate(id.0);
            }
            Undo::Added(id, name) => {
                tree.container[id.0].props.remove(&name);
            }
            Undo::Replaced(id, old) => {
                tree.container[id.0].props.replace(old);
            }
            Undo::Removed(id, position, old) => {
                tree.container[id.0].props.restore(position, old);
            }
            Undo::Attached(id) => {
                if let Some(parent) = tree.container[id.0].parent_id {
                    tree.container[parent.0].children.retain(|c| *c != id);
                }
                let flags = &mut tree.container[id.0].flags;
                flags.remove(NodeFlags::ATTACHED);
                flags.insert(NodeFlags::DETACHED);
            }
        }
    }
}

impl Changeset {
    fn resolver(&self) -> Resolver<'_> {
        Resolver {
            pending: &self.pending,
            created: vec![None; self.pending.len()],
        }
    }

    /// Apply every entry in order, all or nothing.
    ///
    /// On the first failing entry the entries already applied by this call
    /// are reverted newest first and the failing entry's error is returned.
    pub fn apply(&mut self, tree: &mut DeviceTree) -> Result<(), DtError> {
        if self.applied {
            return Err(DtError::AlreadyApplied);
        }
        let mut resolver = self.resolver();
        let mut undo = Vec::with_capacity(self.entries.len());
        for (idx, entry) in self.entries.iter().enumerate() {
            match resolver.apply_entry(tree, entry) {
                Ok(step) => undo.push(step),
                Err(err) => {
                    warn!(
                        "Changeset entry #{} ({:?}) failed: {}, reverting {} applied entries",
                        idx,
                        entry,
                        err,
                        undo.len()
                    );
                    for step in undo.into_iter().rev() {
                        step.revert(tree);
                    }
                    return Err(err);
                }
            }
        }
        debug!("Applied changeset with {} entries", self.entries.len());
        self.applied = true;
        Ok(())
    }

    /// Apply entries in order, stopping at the first failure and keeping
    /// whatever was applied before it.
    pub fn apply_partial(&mut self, tree: &mut DeviceTree) -> Result<(), DtError> {
        if self.applied {
            return Err(DtError::AlreadyApplied);
        }
        self.applied = true;
        let mut resolver = self.resolver();
        for (idx, entry) in self.entries.iter().enumerate() {
            if let Err(err) = resolver.apply_entry(tree, entry) {
                warn!(
                    "Changeset entry #{} ({:?}) failed: {}, keeping {} applied entries",
                    idx, entry, err, idx
                );
                return Err(err);
            }
        }
        Ok(())
    }
}

// endregion
