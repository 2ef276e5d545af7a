use crate::{
    error::DtError,
    prop::{Property, PropertyError, PropertyMap},
};
use alloc::{boxed::Box, collections::btree_map::BTreeMap, string::String, vec, vec::Vec};
use bitflags::bitflags;
use core::ops::Range;
use utils::endian::be32_cells;

/// First value tried when a node needs a fresh phandle.
pub const PHANDLE_BASE: u32 = 0xdeadbeaf;

/// Handle of a node inside the [DeviceTree] that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

bitflags! {
    pub struct NodeFlags: u32 {
        /// Allocated at runtime, not read from a blob.
        const DYNAMIC  = 0x01;
        /// Not linked into its parent's children.
        const DETACHED = 0x02;
        /// Linked into the tree by a changeset.
        const ATTACHED = 0x04;
    }
}

pub struct DeviceTree {
    pub(crate) root_id: NodeId,
    pub(crate) container: Vec<Node>,
    pub(crate) phandle_map: BTreeMap<u32, NodeId>,
    pub mem_rsv_map: Vec<Range<usize>>,
}

#[derive(Debug)]
pub struct Node {
    pub(crate) node_id: NodeId,
    pub(crate) parent_id: Option<NodeId>,
    pub(crate) full_name: Box<str>,
    pub(crate) node_name: Box<str>,
    pub(crate) unit_addr: Box<str>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) props: PropertyMap,
    pub(crate) phandle: Option<u32>,
    pub(crate) flags: NodeFlags,
}

/// Split `name@unit` into its base name and unit address.
pub(crate) fn split_unit_addr(full_name: &str) -> (&str, &str) {
    match full_name.find('@') {
        Some(idx) => (&full_name[..idx], &full_name[idx + 1..]),
        None => (full_name, ""),
    }
}

impl Node {
    pub(crate) fn new(
        node_id: NodeId,
        parent_id: Option<NodeId>,
        full_name: &str,
        flags: NodeFlags,
    ) -> Node {
        let (node_name, unit_addr) = split_unit_addr(full_name);
        Node {
            node_id,
            parent_id,
            full_name: Box::from(full_name),
            node_name: Box::from(node_name),
            unit_addr: Box::from(unit_addr),
            children: vec![],
            props: PropertyMap::new(),
            phandle: None,
            flags,
        }
    }

    pub fn id(&self) -> NodeId {
        self.node_id
    }
    pub fn parent_id(&self) -> Option<NodeId> {
        self.parent_id
    }
    /// Name including the unit address, e.g. `i2c@01c2b000`.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }
    /// Name without the unit address, e.g. `i2c`.
    pub fn name(&self) -> &str {
        &self.node_name
    }
    pub fn unit_addr(&self) -> &str {
        &self.unit_addr
    }
    pub fn phandle(&self) -> Option<u32> {
        self.phandle
    }
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }
    pub fn is_detached(&self) -> bool {
        self.flags.contains(NodeFlags::DETACHED)
    }
    pub fn properties(&self) -> &PropertyMap {
        &self.props
    }
}

impl Default for DeviceTree {
    fn default() -> Self {
        DeviceTree::new()
    }
}

// region: construction

impl DeviceTree {
    /// An empty tree holding only the root node.
    pub fn new() -> DeviceTree {
        let root_id = NodeId(0);
        DeviceTree {
            root_id,
            container: vec![Node::new(root_id, None, "", NodeFlags::empty())],
            phandle_map: BTreeMap::new(),
            mem_rsv_map: vec![],
        }
    }

    pub(crate) fn from_parts(
        root_id: NodeId,
        container: Vec<Node>,
        mem_rsv_map: Vec<Range<usize>>,
    ) -> DeviceTree {
        let phandle_map = container
            .iter()
            .filter_map(|node| Some((node.phandle?, node.node_id)))
            .collect();
        DeviceTree {
            root_id,
            container,
            phandle_map,
            mem_rsv_map,
        }
    }

    /// Add an attached child under `parent`. Used while describing a board, not
    /// by the probing pipeline, which goes through [crate::Changeset].
    pub fn add_node(&mut self, parent: NodeId, full_name: &str) -> Result<NodeId, DtError> {
        self.node(parent).ok_or(DtError::NodeNotFound)?;
        if self.find_child(parent, full_name).is_some() {
            return Err(DtError::DuplicateNode);
        }
        let id = NodeId(self.container.len());
        self.container
            .push(Node::new(id, Some(parent), full_name, NodeFlags::empty()));
        self.container[parent.0].children.push(id);
        Ok(id)
    }

    /// Create or replace a property outside of any changeset.
    pub fn set_property(
        &mut self,
        node: NodeId,
        name: &str,
        value: &[u8],
    ) -> Result<(), DtError> {
        let prop = Property::try_copy(name, value)?;
        self.node_mut(node).ok_or(DtError::NodeNotFound)?.props.replace(prop);
        Ok(())
    }

    /// Return the node's phandle, assigning a fresh one if it has none.
    ///
    /// Fresh values start at [PHANDLE_BASE] and skip every value in use.
    pub fn ensure_phandle(&mut self, node: NodeId) -> Result<u32, DtError> {
        if let Some(phandle) = self.node(node).ok_or(DtError::NodeNotFound)?.phandle {
            return Ok(phandle);
        }
        let mut phandle = PHANDLE_BASE;
        while self.phandle_map.contains_key(&phandle) {
            phandle = phandle.wrapping_add(1);
        }
        self.container[node.0].phandle = Some(phandle);
        self.phandle_map.insert(phandle, node);
        Ok(phandle)
    }
}

// endregion

// region: navigation

impl DeviceTree {
    pub fn root(&self) -> NodeId {
        self.root_id
    }
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.container.get(id.0)
    }
    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.container.get_mut(id.0)
    }
    pub fn is_root(&self, node: NodeId) -> bool {
        node == self.root_id
    }
    pub fn get_parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node)?.parent_id
    }
    pub fn get_children(&self, node: NodeId) -> impl Iterator<Item = &Node> + '_ {
        self.node(node)
            .into_iter()
            .flat_map(move |n| n.children.iter().map(move |x| &self.container[x.0]))
    }
    fn find_child(&self, parent: NodeId, full_name: &str) -> Option<NodeId> {
        self.get_children(parent)
            .find(|child| &*child.full_name == full_name)
            .map(|child| child.node_id)
    }
    pub fn get_full_path(&self, node: NodeId) -> String {
        let Some(n) = self.node(node) else {
            return String::new();
        };
        match n.parent_id {
            None => String::from("/"),
            Some(parent) if self.is_root(parent) => String::from("/") + &n.full_name,
            Some(parent) => self.get_full_path(parent) + "/" + &n.full_name,
        }
    }

    /// Walk `path` from the root, matching each segment against full names.
    pub fn get_node(&self, path: impl AsRef<str>) -> Option<NodeId> {
        let mut node = self.root_id;
        for section in path.as_ref().split('/') {
            if section.trim().is_empty() {
                continue;
            }
            node = self.find_child(node, section)?;
        }
        Some(node)
    }

    pub fn find_node_by_path(&self, path: impl AsRef<str>) -> Option<NodeId> {
        self.get_node(path)
    }

    /// First attached node, in depth-first order from the root, whose base
    /// or full name is `name`.
    pub fn find_node_by_name(&self, name: &str) -> Option<NodeId> {
        let mut stack = vec![self.root_id];
        while let Some(id) = stack.pop() {
            let node = &self.container[id.0];
            if &*node.node_name == name || &*node.full_name == name {
                return Some(id);
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }

    pub fn find_node_by_phandle(&self, phandle: u32) -> Option<NodeId> {
        self.phandle_map.get(&phandle).copied()
    }

    /// All nodes matching `path`, where a segment may be `*`, a base name or a full name.
    pub fn get_nodes(&self, path: impl AsRef<str>) -> Vec<NodeId> {
        let path: Vec<&str> = path
            .as_ref()
            .split('/')
            .filter(|s| !s.trim().is_empty())
            .collect();
        self.get_sub_nodes(self.root_id, &path)
    }
    fn get_sub_nodes(&self, node: NodeId, path: &[&str]) -> Vec<NodeId> {
        let Some((sec, rest)) = path.split_first() else {
            return vec![node];
        };
        self.get_children(node)
            .filter(|child| {
                *sec == "*" || &*child.full_name == *sec || &*child.node_name == *sec
            })
            .flat_map(|child| self.get_sub_nodes(child.node_id, rest))
            .collect()
    }
}

// endregion

// region: properties

impl DeviceTree {
    pub fn get_property(&self, node: NodeId, name: impl AsRef<str>) -> Option<&Property> {
        self.node(node)?.props.get(name.as_ref())
    }

    pub fn find_property(&self, node: NodeId, name: impl AsRef<str>) -> Option<&Property> {
        self.get_property(node, name)
    }

    pub fn properties(&self, node: NodeId) -> impl Iterator<Item = &Property> + '_ {
        self.node(node).into_iter().flat_map(|n| n.props.iter())
    }

    /// Boolean properties are true by presence alone.
    pub fn read_bool(&self, node: NodeId, name: impl AsRef<str>) -> bool {
        self.get_property(node, name).is_some()
    }

    pub fn read_u32(&self, node: NodeId, name: impl AsRef<str>) -> Result<u32, PropertyError> {
        self.get_property(node, name)
            .ok_or(PropertyError::PropNotFound)?
            .value_as_u32()
    }

    pub fn read_str(&self, node: NodeId, name: impl AsRef<str>) -> Result<&str, PropertyError> {
        self.get_property(node, name)
            .ok_or(PropertyError::PropNotFound)?
            .value_as_str()
    }

    /// Decode `reg` into address ranges using the parent's cell widths.
    pub fn get_reg_value(&self, node: NodeId) -> Result<Vec<Range<usize>>, PropertyError> {
        let mut size_cel = 1;
        let mut addr_cel = 2;
        if let Some(parent) = self.get_parent(node) {
            if let Some(prop) = self.get_property(parent, "#address-cells") {
                addr_cel = prop.value_as_u32()? as usize;
            }
            if let Some(prop) = self.get_property(parent, "#size-cells") {
                size_cel = prop.value_as_u32()? as usize;
            }
        }
        let reg = self
            .get_property(node, "reg")
            .ok_or(PropertyError::PropNotFound)?;
        let reg: Vec<u32> = be32_cells(&reg.data).collect();
        let width = size_cel + addr_cel;
        if width == 0 {
            return Err(PropertyError::InvalidPropFormat);
        }
        let mut res = vec![];
        for entry in reg.chunks_exact(width) {
            let (addr_cells, size_cells) = entry.split_at(addr_cel);
            let addr = addr_cells
                .iter()
                .fold(0usize, |acc, c| (acc << 32) | *c as usize);
            let sz = size_cells
                .iter()
                .fold(0usize, |acc, c| (acc << 32) | *c as usize);
            let end = addr
                .checked_add(sz)
                .ok_or(PropertyError::InvalidPropFormat)?;
            res.push(addr..end);
        }
        Ok(res)
    }
}

// endregion
