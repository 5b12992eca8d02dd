// Arena-accounted byte buffers, validity bitmaps, and the nullable column buffer.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::error::{Error, ErrorKind};

/// Allocation authority shared by every buffer built from it.
///
/// An arena does not own memory itself; it counts the bytes held by live
/// buffers and refuses growth past its limit. Buffers return their bytes when
/// dropped, so `allocated_bytes` falls back once a batch is released.
#[derive(Clone, Debug)]
pub struct Arena {
    inner: Arc<ArenaInner>,
}

#[derive(Debug)]
struct ArenaInner {
    allocated: AtomicUsize,
    limit: Option<usize>,
}

impl Arena {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArenaInner {
                allocated: AtomicUsize::new(0),
                limit: None,
            }),
        }
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            inner: Arc::new(ArenaInner {
                allocated: AtomicUsize::new(0),
                limit: Some(limit),
            }),
        }
    }

    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> Option<usize> {
        self.inner.limit
    }

    pub fn same_arena(&self, other: &Arena) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn reserve(&self, bytes: usize) -> Result<(), Error> {
        if bytes == 0 {
            return Ok(());
        }
        let Some(limit) = self.inner.limit else {
            self.inner.allocated.fetch_add(bytes, Ordering::AcqRel);
            return Ok(());
        };
        let mut current = self.inner.allocated.load(Ordering::Acquire);
        loop {
            let next = current.checked_add(bytes).filter(|next| *next <= limit).ok_or_else(|| {
                Error::new(ErrorKind::Allocation)
                    .with_message(format!(
                        "arena limit exceeded: {current} + {bytes} > {limit} bytes"
                    ))
                    .with_hint("Raise the memory limit or drop unused flights.")
            })?;
            match self.inner.allocated.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, bytes: usize) {
        if bytes > 0 {
            self.inner.allocated.fetch_sub(bytes, Ordering::AcqRel);
        }
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

/// Growable byte storage whose length is charged against an [`Arena`].
#[derive(Debug)]
pub struct Buffer {
    bytes: Vec<u8>,
    arena: Arena,
}

impl Buffer {
    pub fn new(arena: &Arena) -> Self {
        Self {
            bytes: Vec::new(),
            arena: arena.clone(),
        }
    }

    /// Empty buffer with reserved capacity; only length is charged.
    pub fn with_capacity(arena: &Arena, capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            arena: arena.clone(),
        }
    }

    pub fn zeroed(arena: &Arena, len: usize) -> Result<Self, Error> {
        let mut buffer = Self::new(arena);
        buffer.resize(len)?;
        Ok(buffer)
    }

    pub fn from_slice(arena: &Arena, bytes: &[u8]) -> Result<Self, Error> {
        let mut buffer = Self::new(arena);
        buffer.extend_from_slice(bytes)?;
        Ok(buffer)
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Grows (zero-filled) or shrinks to `len`, adjusting the arena charge.
    pub fn resize(&mut self, len: usize) -> Result<(), Error> {
        let current = self.bytes.len();
        if len > current {
            self.arena.reserve(len - current)?;
        } else {
            self.arena.release(current - len);
        }
        self.bytes.resize(len, 0);
        Ok(())
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.arena.reserve(bytes.len())?;
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    pub fn try_clone(&self) -> Result<Self, Error> {
        Self::from_slice(&self.arena, &self.bytes)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.arena.release(self.bytes.len());
    }
}

/// Bit-packed presence flags, least significant bit first; 1 means present.
#[derive(Debug)]
pub struct ValidityBitmap {
    bits: Buffer,
    len: usize,
}

impl ValidityBitmap {
    pub fn new(arena: &Arena) -> Self {
        Self {
            bits: Buffer::new(arena),
            len: 0,
        }
    }

    /// All-null bitmap of `len` bits.
    pub fn with_len(arena: &Arena, len: usize) -> Result<Self, Error> {
        Ok(Self {
            bits: Buffer::zeroed(arena, bitmap_bytes(len))?,
            len,
        })
    }

    pub fn from_bytes(arena: &Arena, bytes: &[u8], len: usize) -> Result<Self, Error> {
        if bytes.len() < bitmap_bytes(len) {
            return Err(Error::new(ErrorKind::MalformedEncoding)
                .with_message(format!(
                    "validity bitmap holds {} bytes, {} bits need {}",
                    bytes.len(),
                    len,
                    bitmap_bytes(len)
                )));
        }
        Ok(Self {
            bits: Buffer::from_slice(arena, &bytes[..bitmap_bytes(len)])?,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bits.as_slice()
    }

    pub fn is_valid(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        (self.bits.as_slice()[index / 8] >> (index % 8)) & 1 == 1
    }

    /// Sets bit `index`, growing the bitmap (new bits null) when needed.
    pub fn set(&mut self, index: usize, valid: bool) -> Result<(), Error> {
        if index >= self.len {
            let len = index.checked_add(1).ok_or_else(|| {
                Error::new(ErrorKind::Allocation)
                    .with_message("validity bitmap cannot grow past usize::MAX bits")
                    .with_index(index as u64)
            })?;
            self.resize(len)?;
        }
        let byte = &mut self.bits.as_mut_slice()[index / 8];
        if valid {
            *byte |= 1 << (index % 8);
        } else {
            *byte &= !(1 << (index % 8));
        }
        Ok(())
    }

    /// Changes the logical length; bits beyond the old length read as null.
    pub fn resize(&mut self, len: usize) -> Result<(), Error> {
        if len < self.len {
            for index in len..self.len {
                let byte = &mut self.bits.as_mut_slice()[index / 8];
                *byte &= !(1 << (index % 8));
            }
        }
        self.bits.resize(bitmap_bytes(len))?;
        self.len = len;
        Ok(())
    }

    pub fn null_count(&self) -> usize {
        (0..self.len).filter(|index| !self.is_valid(*index)).count()
    }

    pub fn try_clone(&self) -> Result<Self, Error> {
        Ok(Self {
            bits: self.bits.try_clone()?,
            len: self.len,
        })
    }
}

pub fn bitmap_bytes(bits: usize) -> usize {
    bits.div_ceil(8)
}

/// Nullable column storage: a validity bitmap beside a raw data buffer.
///
/// Bytes behind a cleared validity bit are unspecified; readers check
/// `is_valid` before decoding.
#[derive(Debug)]
pub struct ColumnBuffer {
    pub validity: ValidityBitmap,
    pub data: Buffer,
}

impl ColumnBuffer {
    pub fn new(arena: &Arena) -> Self {
        Self {
            validity: ValidityBitmap::new(arena),
            data: Buffer::new(arena),
        }
    }

    pub fn arena(&self) -> &Arena {
        self.data.arena()
    }

    pub fn try_clone(&self) -> Result<Self, Error> {
        Ok(Self {
            validity: self.validity.try_clone()?,
            data: self.data.try_clone()?,
        })
    }
}
