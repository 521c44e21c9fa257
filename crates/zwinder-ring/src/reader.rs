use std::io::{self, Read};

/// A fresh byte stream over one stored snapshot.
///
/// Snapshots may wrap across the arena boundary, so the reader walks up to
/// two borrowed segments. The stream stays readable until the backing store
/// is mutated again; callers that need the bytes to outlive that copy them
/// out.
pub struct StateReader<'a> {
    first: &'a [u8],
    second: &'a [u8],
}

impl<'a> StateReader<'a> {
    /// Reader over one contiguous slice.
    pub fn contiguous(bytes: &'a [u8]) -> Self {
        Self {
            first: bytes,
            second: &[],
        }
    }

    /// Reader over a snapshot stored as two physical segments.
    pub fn split(first: &'a [u8], second: &'a [u8]) -> Self {
        Self { first, second }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.first.len() + self.second.len()
    }
}

impl Read for StateReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.first.is_empty() {
            std::mem::swap(&mut self.first, &mut self.second);
        }
        let n = self.first.len().min(buf.len());
        buf[..n].copy_from_slice(&self.first[..n]);
        self.first = &self.first[n..];
        Ok(n)
    }
}
