//! Buffer exchange with the sandboxed engine.
//!
//! The module owns its linear memory. Requests are written into a buffer the module allocates for
//! us; responses come back as a [`PackedPointer`] to a buffer the module allocated and that we must
//! hand back exactly once.
use crate::{Error, Result};

/// A `u64` returned by the module: the low 32 bits are an offset into guest memory, the high 32
/// bits a byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedPointer {
    pub offset: u32,
    pub len: u32,
}

impl PackedPointer {
    pub fn new(offset: u32, len: u32) -> PackedPointer {
        PackedPointer { offset, len }
    }
}

impl From<u64> for PackedPointer {
    fn from(value: u64) -> Self {
        PackedPointer {
            offset: (value & 0xFFFF_FFFF) as u32,
            len: (value >> 32) as u32,
        }
    }
}

impl From<PackedPointer> for u64 {
    fn from(value: PackedPointer) -> Self {
        (u64::from(value.len) << 32) | u64::from(value.offset)
    }
}

/// Linear memory of a sandboxed module, as seen from the host.
pub trait GuestMemory {
    /// Ask the module for a request buffer of `len` bytes.
    fn alloc(&mut self, len: u32) -> Result<u32>;

    /// Return a request buffer previously obtained with [`GuestMemory::alloc`].
    fn dealloc(&mut self, offset: u32, len: u32) -> Result<()>;

    /// Return a response buffer the module handed out.
    fn dealloc_response(&mut self, offset: u32, len: u32) -> Result<()>;

    /// Copy `len` bytes out of guest memory. Fails if the range is out of bounds.
    fn read(&mut self, offset: u32, len: u32) -> Result<Vec<u8>>;

    /// Copy `bytes` into guest memory at `offset`. Fails if the range is out of bounds.
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<()>;

    /// Copy the bytes from `offset` up to, not including, the next NUL. Fails if memory ends
    /// first.
    fn read_c_str(&mut self, offset: u32) -> Result<Vec<u8>>;
}

/// Read the NUL-terminated string at `offset`. A null pointer is no string at all.
///
/// The string stays owned by the module.
pub fn read_c_string<M>(memory: &mut M, offset: u32) -> Result<Option<String>>
where
    M: GuestMemory + ?Sized,
{
    if offset == 0 {
        return Ok(None);
    }
    let bytes = memory.read_c_str(offset)?;
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|err| Error::parse(format!("engine string is not UTF-8: {err}"), err.as_bytes()))
}

/// Bytes of `memory` from `offset` to the first NUL, or `None` when there is none.
pub(crate) fn nul_terminated(memory: &[u8], offset: u32) -> Option<&[u8]> {
    let tail = memory.get(offset as usize..)?;
    let end = tail.iter().position(|byte| *byte == 0)?;
    Some(&tail[..end])
}

/// Place `bytes` in a freshly allocated guest buffer for the duration of `call`.
///
/// The buffer is released whether `call` succeeds or not. A release failure is only reported when
/// the call itself succeeded.
pub fn with_request<M, T>(
    memory: &mut M,
    bytes: &[u8],
    call: impl FnOnce(&mut M, u32, u32) -> Result<T>,
) -> Result<T>
where
    M: GuestMemory + ?Sized,
{
    let len = u32::try_from(bytes.len()).map_err(|_| {
        Error::InvalidInput(format!(
            "request of {} bytes does not fit the engine's address space",
            bytes.len()
        ))
    })?;
    let offset = memory.alloc(len)?;

    let result = memory
        .write(offset, bytes)
        .and_then(|()| call(memory, offset, len));
    let released = memory.dealloc(offset, len);

    let value = result?;
    released?;
    Ok(value)
}

/// Copy a response out of guest memory, release it, then decode it.
///
/// The release happens before decoding so a malformed payload can never leak its buffer. A zero
/// length response is still released. A null offset with a non-zero length is rejected without
/// touching guest memory.
pub fn take_response<M, T>(
    memory: &mut M,
    pointer: PackedPointer,
    decode: impl FnOnce(&[u8]) -> Result<T>,
) -> Result<T>
where
    M: GuestMemory + ?Sized,
{
    if pointer.offset == 0 && pointer.len > 0 {
        return Err(Error::parse(
            format!(
                "engine returned a null response pointer with length {}",
                pointer.len
            ),
            &[],
        ));
    }

    let bytes = memory.read(pointer.offset, pointer.len)?;
    memory.dealloc_response(pointer.offset, pointer.len)?;

    decode(&bytes)
}
