use crate::{
    fdt::{FDT_HEADER_SIZE, FdtHeader, FdtNodeType},
    node::{DeviceTree, Node, NodeFlags, NodeId},
    prop::Property,
};
use alloc::{vec, vec::Vec};
use core::{ops::Range, str};
use log::warn;
use thiserror::Error;
use utils::{
    endian::{BigEndian32, BigEndian64, EndianData},
    num::AlignableTo,
};

/// Parses a flattened device tree blob into an owned [DeviceTree].
pub struct FdtReader<'a> {
    blob: &'a [u8],
    cursor: usize,
    nodes: Vec<Node>,
}

/// Basic Reader Functions
impl<'a> FdtReader<'a> {
    /// Read a 32-bit big-endian word at the cursor without advancing it.
    #[inline(always)]
    fn peek_u32(&self) -> Result<u32, FdtError> {
        self.u32_at(self.cursor)
    }

    fn u32_at(&self, offset: usize) -> Result<u32, FdtError> {
        self.blob
            .get(offset..)
            .and_then(BigEndian32::from_bytes)
            .map(|v| v.value())
            .ok_or(FdtError::Truncated { offset })
    }

    /// Advance the cursor by 4 bytes.
    #[inline(always)]
    fn advance(&mut self) {
        self.cursor += 4;
    }

    /// Read a 32-bit big-endian word and advance the cursor by 4 bytes.
    #[inline(always)]
    fn read_u32(&mut self) -> Result<u32, FdtError> {
        let res = self.peek_u32()?;
        self.advance();
        Ok(res)
    }

    /// Read `len` bytes and move the cursor to the next 4-byte aligned position.
    fn readbytes_aligned(&mut self, len: usize) -> Result<&'a [u8], FdtError> {
        let res = self
            .blob
            .get(self.cursor..self.cursor + len)
            .ok_or(FdtError::Truncated {
                offset: self.cursor,
            })?;
        self.cursor = (self.cursor + len).align_up(4);
        Ok(res)
    }

    /// Advance past zero words and NOPs to the next meaningful token.
    fn skip(&mut self) -> Result<(), FdtError> {
        let mut p = self.peek_u32()?;
        while p == 0 || p == FdtNodeType::FDT_NOP.bits() {
            self.advance();
            p = self.peek_u32()?;
        }
        Ok(())
    }

    /// Read a NUL-terminated string and move the cursor to the next aligned position.
    fn readstr_aligned(&mut self) -> Result<&'a str, FdtError> {
        let start = self.cursor;
        let s = cstr_at(self.blob, start)?;
        self.cursor = (start + s.len() + 1).align_up(4);
        Ok(s)
    }

    /// Read a tag word and verify it equals `supposed`.
    fn read_and_check(&mut self, supposed: FdtNodeType) -> Result<(), FdtError> {
        let node_type = self.read_u32()?;
        if node_type != supposed.bits() {
            return Err(FdtError::InvalidNodeType {
                node_type,
                cursor: self.cursor,
            });
        }
        Ok(())
    }
}

fn cstr_at(blob: &[u8], offset: usize) -> Result<&str, FdtError> {
    let tail = blob.get(offset..).ok_or(FdtError::Truncated { offset })?;
    let len = tail
        .iter()
        .position(|b| *b == 0)
        .ok_or(FdtError::Truncated { offset })?;
    str::from_utf8(&tail[..len]).map_err(|_| FdtError::InvalidString { offset })
}

impl<'a> FdtReader<'a> {
    /// Expected FDT magic number (0xd00dfeed).
    pub const FDT_MAGIC: u32 = 0xd00dfeed;
    /// The FDT version this parser targets.
    pub const FDT_VERSION: u32 = 17;
    /// The last compatible FDT version accepted by this parser.
    pub const LAST_COMP_VERSION: u32 = 16;

    pub fn new(blob: &'a [u8]) -> FdtReader<'a> {
        FdtReader {
            blob,
            cursor: 0,
            nodes: vec![],
        }
    }

    /// Decode the header words.
    pub fn get_header(&self) -> Result<FdtHeader, FdtError> {
        if self.blob.len() < FDT_HEADER_SIZE {
            return Err(FdtError::Truncated { offset: 0 });
        }
        let word = |idx: usize| self.u32_at(idx * 4);
        Ok(FdtHeader {
            magic: word(0)?,
            totalsize: word(1)?,
            off_dt_struct: word(2)?,
            off_dt_strings: word(3)?,
            off_mem_rsvmap: word(4)?,
            version: word(5)?,
            last_comp_version: word(6)?,
            boot_cpuid_phys: word(7)?,
            size_dt_strings: word(8)?,
            size_dt_struct: word(9)?,
        })
    }

    /// Validate the FDT header (magic number and compatible version range).
    pub fn validate(&self) -> Result<FdtHeader, FdtError> {
        let header = self.get_header()?;

        // 1. Check the magic number
        if header.magic != Self::FDT_MAGIC {
            return Err(FdtError::InvalidMagic {
                magic: header.magic,
            });
        }

        // 2. Check the fdt version. We use version 17, and the last compatible version is 16
        if header.version < Self::LAST_COMP_VERSION
            || header.last_comp_version > Self::FDT_VERSION
        {
            return Err(FdtError::IncompatibleVersion {
                version: header.version,
            });
        }
        if header.totalsize as usize > self.blob.len() {
            return Err(FdtError::Truncated {
                offset: self.blob.len(),
            });
        }
        Ok(header)
    }

    /// Read a NUL-terminated string from the string table at `offset`.
    pub fn get_string(&self, header: &FdtHeader, offset: usize) -> Result<&'a str, FdtError> {
        cstr_at(self.blob, header.off_dt_strings as usize + offset)
    }

    /// Read consecutive property entries until a non-`FDT_PROP` tag shows up.
    fn read_props(&mut self, header: &FdtHeader, node: &mut Node) -> Result<(), FdtError> {
        loop {
            self.skip()?;
            if self.peek_u32()? != FdtNodeType::FDT_PROP.bits() {
                return Ok(());
            }
            self.advance();
            let len = self.read_u32()? as usize;
            let name_offset = self.read_u32()? as usize;
            let name = self.get_string(header, name_offset)?;
            let data = self.readbytes_aligned(len)?;
            let prop = Property::new(name, data);
            if (name == "phandle" || name == "linux,phandle") && node.phandle.is_none() {
                node.phandle = prop.value_as_u32().ok();
            }
            if let Err(dup) = node.props.insert(prop) {
                warn!("Dropping duplicate property {} of {}", dup.name, node.full_name());
            }
        }
    }

    /// Parse a node, its properties and its subtree, returning its id.
    fn read_node(&mut self, header: &FdtHeader, parent: Option<NodeId>) -> Result<NodeId, FdtError> {
        self.skip()?;
        self.read_and_check(FdtNodeType::FDT_BEGIN_NODE)?;
        let full_name = self.readstr_aligned()?;
        let id = NodeId(self.nodes.len());
        let mut node = Node::new(id, parent, full_name, NodeFlags::empty());
        self.read_props(header, &mut node)?;
        self.nodes.push(node);
        loop {
            self.skip()?;
            let nodetype = self.peek_u32()?;
            if nodetype == FdtNodeType::FDT_BEGIN_NODE.bits() {
                let child = self.read_node(header, Some(id))?;
                self.nodes[id.0].children.push(child);
            } else if nodetype == FdtNodeType::FDT_END_NODE.bits() {
                self.advance();
                break;
            } else {
                return Err(FdtError::InvalidNodeType {
                    node_type: nodetype,
                    cursor: self.cursor,
                });
            }
        }
        Ok(id)
    }

    /// Get the memory reservation map.
    ///
    /// **The reserved memory block are not promised to be not overlapped**
    fn get_mem_rsv_map(&self, header: &FdtHeader) -> Result<Vec<Range<usize>>, FdtError> {
        let mut offset = header.off_mem_rsvmap as usize;
        let mut res = Vec::new();
        loop {
            let entry = |at: usize| {
                self.blob
                    .get(at..)
                    .and_then(BigEndian64::from_bytes)
                    .map(|v| v.value() as usize)
                    .ok_or(FdtError::Truncated { offset: at })
            };
            let addr = entry(offset)?;
            let size = entry(offset + 8)?;
            if addr == 0 && size == 0 {
                break Ok(res);
            }
            let end = addr
                .checked_add(size)
                .ok_or(FdtError::Truncated { offset })?;
            res.push(addr..end);
            offset += 16;
        }
    }

    fn read_internal(&mut self) -> Result<DeviceTree, FdtError> {
        let header = self.validate()?;
        self.cursor = header.off_dt_struct as usize;
        let root_id = self.read_node(&header, None)?;
        self.skip()?;
        self.read_and_check(FdtNodeType::FDT_END)?;
        let mem_rsv_map = self.get_mem_rsv_map(&header)?;
        Ok(DeviceTree::from_parts(
            root_id,
            core::mem::take(&mut self.nodes),
            mem_rsv_map,
        ))
    }

    /// Parse the whole structure block.
    ///
    /// All strings and byte-array data are **copied**, so the blob can be dropped afterwards.
    pub fn read(&mut self) -> Result<DeviceTree, FdtError> {
        let res = self.read_internal();
        if res.is_err() {
            self.cursor = 0;
            self.nodes.clear();
        }
        res
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FdtError {
    #[error("blob truncated at offset {offset:#x}")]
    Truncated { offset: usize },
    #[error("unexpected token {node_type:#x} before offset {cursor:#x}")]
    InvalidNodeType { node_type: u32, cursor: usize },
    #[error("bad magic {magic:#x}")]
    InvalidMagic { magic: u32 },
    #[error("incompatible version {version}")]
    IncompatibleVersion { version: u32 },
    #[error("string at offset {offset:#x} is not utf-8")]
    InvalidString { offset: usize },
}
