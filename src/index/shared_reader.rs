//! Reference-counted readers.
//!
//! A [`SharedReader`] starts with one reference owned by whoever opened it
//! (the NRT reader cache). Every reader handed to a caller is a
//! [`ReaderLease`] that took its own reference; dropping the lease releases
//! it. The underlying reader is closed exactly once, by the last release.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Result, SluiceError};
use crate::index::IndexReader;

struct ReaderInner {
    reader: Box<dyn IndexReader>,
    ref_count: AtomicUsize,
    generation: u64,
}

/// A reader plus its reference count.
#[derive(Clone)]
pub struct SharedReader {
    inner: Arc<ReaderInner>,
}

impl fmt::Debug for SharedReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedReader")
            .field("generation", &self.inner.generation)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

impl SharedReader {
    /// Wrap a freshly opened reader. The caller owns the initial reference.
    pub fn new(reader: Box<dyn IndexReader>, generation: u64) -> Self {
        Self {
            inner: Arc::new(ReaderInner {
                reader,
                ref_count: AtomicUsize::new(1),
                generation,
            }),
        }
    }

    /// Generation of index changes this reader reflects.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn ref_count(&self) -> usize {
        self.inner.ref_count.load(Ordering::Acquire)
    }

    /// Take a reference unless the reader has already been closed.
    pub fn try_inc_ref(&self) -> bool {
        let mut current = self.inner.ref_count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.inner.ref_count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Release a reference, closing the reader when it was the last one.
    ///
    /// The count never goes below zero: releasing a closed reader is an error.
    pub fn dec_ref(&self) -> Result<()> {
        let mut current = self.inner.ref_count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(SluiceError::invalid_operation(format!(
                    "reader of generation {} is already closed",
                    self.inner.generation
                )));
            }
            match self.inner.ref_count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if current == 1 {
            log::trace!("closing reader of generation {}", self.inner.generation);
            self.inner.reader.close();
        }
        Ok(())
    }

    /// Take a reference and wrap it in a lease, or `None` if already closed.
    pub fn lease(&self) -> Option<ReaderLease> {
        if self.try_inc_ref() {
            Some(ReaderLease {
                reader: self.clone(),
            })
        } else {
            None
        }
    }

    pub fn reader(&self) -> &(dyn IndexReader + 'static) {
        self.inner.reader.as_ref()
    }
}

/// A caller's reference to a [`SharedReader`]; dropping it closes the reader
/// if nobody else holds it.
pub struct ReaderLease {
    reader: SharedReader,
}

impl ReaderLease {
    pub fn generation(&self) -> u64 {
        self.reader.generation()
    }

    pub fn shared(&self) -> &SharedReader {
        &self.reader
    }
}

impl fmt::Debug for ReaderLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReaderLease").field(&self.reader).finish()
    }
}

impl Deref for ReaderLease {
    type Target = dyn IndexReader;

    fn deref(&self) -> &Self::Target {
        self.reader.reader()
    }
}

impl Drop for ReaderLease {
    fn drop(&mut self) {
        if let Err(e) = self.reader.dec_ref() {
            log::warn!("failed to release reader: {e}");
        }
    }
}
