//! Deduplicated, lazily symbolized call-stack capture.
//!
//! Capturing a stack walks the current thread into a pooled scratch buffer,
//! fingerprints the raw return addresses, and looks the sequence up in a
//! process-wide cache of weakly held entries. Repeated captures from the same
//! call site share one entry, and an entry is freed as soon as the last
//! handle to it goes away. Symbolization runs only when text is first asked
//! for, once per entry.
//!
//! The `error`, `logging` and `recover` modules build a small error type on
//! top of the cache.

mod cache;
mod capture;
mod config;
mod entry;
mod error;
mod fingerprint;
mod logging;
mod pool;
mod recover;
mod symbolize;

use {
  crossbeam_queue::ArrayQueue,
  nohash_hasher::BuildNoHashHasher,
  serde::{Serialize, Serializer, ser::SerializeMap},
  serde_json::{Map, Value},
  std::{
    any::Any,
    collections::HashMap,
    env,
    error::Error as StdError,
    ffi::{OsStr, c_void},
    fmt::{self, Debug, Display, Formatter, Write as _},
    mem,
    ops::Deref,
    panic::{self, UnwindSafe},
    path::Path,
    sync::{
      Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
    },
  },
  tracing::{debug, trace, warn},
};

#[cfg(test)]
use std::{
  sync::{
    Barrier,
    atomic::{AtomicUsize, Ordering},
  },
  thread,
  time::Duration,
};

pub use {
  cache::{CacheStats, StackCache, StackCacheBuilder},
  capture::{FrameCapturer, FrameSource, NativeFrames, RawFrame},
  config::{CacheConfig, ConfigError},
  entry::{Stack, StackEntry},
  error::Error,
  fingerprint::{Fingerprint, fingerprint},
  logging::{fields, log_error},
  pool::{ScratchBuffer, ScratchPool},
  recover::{catch_panic, from_panic},
  symbolize::{
    FrameMetadata, NativeSymbolizer, Symbolizer, render, resolve_all,
  },
};

static DEFAULT_CACHE: OnceLock<StackCache> = OnceLock::new();

/// The process-wide cache used by `capture_stack` and `Error::with_stack`.
///
/// Configured from `TRACECACHE_*` environment variables on first use.
pub fn default_cache() -> &'static StackCache {
  DEFAULT_CACHE
    .get_or_init(|| StackCache::with_config(CacheConfig::from_env()))
}

/// Capture the caller's stack through the process-wide cache.
///
/// `skip` drops that many additional frames above the caller.
#[inline(never)]
#[must_use]
pub fn capture_stack(skip: usize) -> Stack {
  let anchor = capture_stack as fn(usize) -> Stack as usize;
  default_cache().capture_from(skip, anchor)
}

/// Formatted text of `stack`, computed on first use.
#[must_use]
pub fn format_stack(stack: &Stack) -> &str {
  stack.formatted()
}
