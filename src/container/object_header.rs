//! Object headers - the message lists that describe groups and datasets
//!
//! Version 1 and 2 headers are read, including continuation chunks. Headers
//! are always written as version 2 with a single chunk.

use super::format::{read_clamped, read_exact};
use super::messages::{CONTINUATION, NIL};
use crate::error::{ContainerError, Result};
use crate::io::BlockIo;
use crate::utils::{jenkins_lookup3, verify_checksum};
use byteorder::{ByteOrder, LittleEndian};

const OHDR_SIGNATURE: &[u8; 4] = b"OHDR";
const OCHK_SIGNATURE: &[u8; 4] = b"OCHK";

/// Message flag: the message may not change
pub const FLAG_CONSTANT: u8 = 0x01;
/// Message flag: the body is a reference to a shared message
pub const FLAG_SHARED: u8 = 0x02;

const HEADER_FLAG_TIMES: u8 = 0x20;
const HEADER_FLAG_PHASE_CHANGE: u8 = 0x10;
const HEADER_FLAG_CREATION_ORDER: u8 = 0x04;

/// Longest fixed part of a version 2 header before its messages
const V2_PREFIX_MAX: u64 = 6 + 16 + 4 + 8;

/// Upper bound on continuation chunks followed for one object
const MAX_CHUNKS: usize = 4096;

/// One header message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: u16,
    pub flags: u8,
    pub data: Vec<u8>,
}

/// Messages of one object, continuation chunks included
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHeader {
    pub messages: Vec<Message>,
    /// Seconds since the epoch, when the header records times
    pub modified: Option<u32>,
    pub created: Option<u32>,
}

impl ObjectHeader {
    /// Parse the header at absolute offset `addr`; continuation addresses are
    /// relative to `base`
    pub fn read(io: &mut dyn BlockIo, addr: u64, base: u64) -> Result<Self> {
        let prefix = read_clamped(io, addr, V2_PREFIX_MAX)?;
        if prefix.starts_with(OHDR_SIGNATURE) {
            Self::read_v2(io, addr, base, &prefix)
        } else {
            Self::read_v1(io, addr, base, &prefix)
        }
    }

    pub fn find(&self, kind: u16) -> Option<&Message> {
        self.messages.iter().find(|m| m.kind == kind)
    }

    pub fn all(&self, kind: u16) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.kind == kind)
    }

    pub fn has(&self, kind: u16) -> bool {
        self.find(kind).is_some()
    }

    fn read_v1(io: &mut dyn BlockIo, addr: u64, base: u64, prefix: &[u8]) -> Result<Self> {
        if prefix.len() < 16 || prefix[0] != 1 {
            return Err(ContainerError::ContainerIo(format!(
                "no object header at address {}",
                addr
            )));
        }
        let size = LittleEndian::read_u32(&prefix[8..12]) as usize;

        let mut header = Self::default();
        let mut pending = vec![(addr + 16, size)];
        let mut visited = 0usize;
        while let Some((chunk_addr, len)) = pending.pop() {
            visited += 1;
            if visited > MAX_CHUNKS {
                return Err(too_many_chunks(addr));
            }
            let chunk = read_exact(io, base + chunk_addr, len)?;
            let mut pos = 0usize;
            while pos + 8 <= chunk.len() {
                let kind = LittleEndian::read_u16(&chunk[pos..]);
                let len = LittleEndian::read_u16(&chunk[pos + 2..]) as usize;
                let flags = chunk[pos + 4];
                pos += 8;
                let data = chunk.get(pos..pos + len).ok_or_else(|| truncated(addr))?;
                pos += len;
                header.push(kind, flags, data, &mut pending)?;
            }
        }
        Ok(header)
    }

    fn read_v2(io: &mut dyn BlockIo, addr: u64, base: u64, prefix: &[u8]) -> Result<Self> {
        let get = |at: usize| prefix.get(at).copied().ok_or_else(|| truncated(addr));
        if get(4)? != 2 {
            return Err(ContainerError::UnsupportedVersion(get(4)? as u32));
        }
        let flags = get(5)?;

        let mut header = Self::default();
        let mut pos = 6usize;
        if flags & HEADER_FLAG_TIMES != 0 {
            let times = prefix.get(pos..pos + 16).ok_or_else(|| truncated(addr))?;
            header.modified = Some(LittleEndian::read_u32(&times[4..]));
            header.created = Some(LittleEndian::read_u32(&times[12..]));
            pos += 16;
        }
        if flags & HEADER_FLAG_PHASE_CHANGE != 0 {
            pos += 4;
        }
        let width = 1usize << (flags & 0x03);
        let raw = prefix.get(pos..pos + width).ok_or_else(|| truncated(addr))?;
        let size = LittleEndian::read_uint(raw, width) as usize;
        pos += width;

        let total = pos + size + 4;
        let block = read_exact(io, addr, total)?;
        verify(&block, addr)?;

        let creation_order = flags & HEADER_FLAG_CREATION_ORDER != 0;
        let mut pending = Vec::new();
        header.parse_v2_messages(&block[pos..pos + size], creation_order, &mut pending, addr)?;

        let mut visited = 0usize;
        while let Some((chunk_addr, len)) = pending.pop() {
            visited += 1;
            if visited > MAX_CHUNKS {
                return Err(too_many_chunks(addr));
            }
            let chunk = read_exact(io, base + chunk_addr, len)?;
            if len < 8 || !chunk.starts_with(OCHK_SIGNATURE) {
                return Err(ContainerError::ContainerIo(format!(
                    "bad continuation chunk at {} for object {}",
                    chunk_addr, addr
                )));
            }
            verify(&chunk, chunk_addr)?;
            header.parse_v2_messages(&chunk[4..len - 4], creation_order, &mut pending, addr)?;
        }
        Ok(header)
    }

    fn parse_v2_messages(
        &mut self,
        body: &[u8],
        creation_order: bool,
        pending: &mut Vec<(u64, usize)>,
        addr: u64,
    ) -> Result<()> {
        let prefix = if creation_order { 6 } else { 4 };
        let mut pos = 0usize;
        // Fewer bytes than a message prefix left over is a gap
        while pos + prefix <= body.len() {
            let kind = body[pos] as u16;
            let len = LittleEndian::read_u16(&body[pos + 1..]) as usize;
            let flags = body[pos + 3];
            pos += prefix;
            let data = body.get(pos..pos + len).ok_or_else(|| truncated(addr))?;
            pos += len;
            self.push(kind, flags, data, pending)?;
        }
        Ok(())
    }

    fn push(&mut self, kind: u16, flags: u8, data: &[u8], pending: &mut Vec<(u64, usize)>) -> Result<()> {
        match kind {
            NIL => {}
            CONTINUATION => {
                if data.len() < 16 {
                    return Err(ContainerError::ContainerIo(
                        "continuation message is truncated".to_string(),
                    ));
                }
                pending.push((
                    LittleEndian::read_u64(data),
                    LittleEndian::read_u64(&data[8..]) as usize,
                ));
            }
            _ => self.messages.push(Message {
                kind,
                flags,
                data: data.to_vec(),
            }),
        }
        Ok(())
    }
}

fn verify(block: &[u8], addr: u64) -> Result<()> {
    let (body, tail) = block.split_at(block.len() - 4);
    if !verify_checksum(body, LittleEndian::read_u32(tail)) {
        return Err(ContainerError::ContainerIo(format!(
            "checksum mismatch in object header at {}",
            addr
        )));
    }
    Ok(())
}

fn truncated(addr: u64) -> ContainerError {
    ContainerError::ContainerIo(format!("object header at {} is truncated", addr))
}

fn too_many_chunks(addr: u64) -> ContainerError {
    ContainerError::ContainerIo(format!(
        "object header at {} has more than {} chunks",
        addr, MAX_CHUNKS
    ))
}

/// Builds a version 2 object header
#[derive(Debug, Default)]
pub struct HeaderWriter {
    messages: Vec<Message>,
    times: Option<(u32, u32)>,
}

impl HeaderWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record modification and creation times, in seconds since the epoch
    pub fn with_times(mut self, modified: u32, created: u32) -> Self {
        self.times = Some((modified, created));
        self
    }

    pub fn add(&mut self, kind: u16, data: Vec<u8>) {
        self.add_with_flags(kind, 0, data);
    }

    pub fn add_with_flags(&mut self, kind: u16, flags: u8, data: Vec<u8>) {
        self.messages.push(Message { kind, flags, data });
    }

    /// Serialize the header, checksum included
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        for message in &self.messages {
            let len = u16::try_from(message.data.len()).map_err(|_| {
                ContainerError::ContainerIo(format!(
                    "header message type {} is {} bytes, more than one message can hold",
                    message.kind,
                    message.data.len()
                ))
            })?;
            body.push(message.kind as u8);
            body.extend_from_slice(&len.to_le_bytes());
            body.push(message.flags);
            body.extend_from_slice(&message.data);
        }

        let (size_flags, width) = match body.len() {
            0..=0xFF => (0u8, 1usize),
            0x100..=0xFFFF => (1, 2),
            _ => (2, 4),
        };

        let mut out = Vec::with_capacity(body.len() + 32);
        out.extend_from_slice(OHDR_SIGNATURE);
        out.push(2);
        match self.times {
            Some((modified, created)) => {
                out.push(size_flags | HEADER_FLAG_TIMES);
                for time in [modified, modified, modified, created] {
                    out.extend_from_slice(&time.to_le_bytes());
                }
            }
            None => out.push(size_flags),
        }
        let mut size = [0u8; 8];
        LittleEndian::write_uint(&mut size, body.len() as u64, 8);
        out.extend_from_slice(&size[..width]);
        out.extend_from_slice(&body);
        let checksum = jenkins_lookup3(&out);
        out.extend_from_slice(&checksum.to_le_bytes());
        Ok(out)
    }
}
