use super::*;

type Bucket = Vec<Weak<StackEntry>>;
type Buckets = HashMap<Fingerprint, Bucket, BuildNoHashHasher<Fingerprint>>;

/// Point-in-time view of the cache's bookkeeping.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct CacheStats {
  pub buckets: usize,
  pub dead_entries: usize,
  pub live_entries: usize,
}

/// Assembles a `StackCache` from its collaborators.
#[derive(Debug)]
pub struct StackCacheBuilder {
  config: CacheConfig,
  source: Arc<dyn FrameSource>,
  symbolizer: Arc<dyn Symbolizer>,
}

impl Default for StackCacheBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl StackCacheBuilder {
  /// # Errors
  ///
  /// Returns a `ConfigError` if the configuration fails validation.
  pub fn build(self) -> Result<StackCache, ConfigError> {
    self.config.validate()?;

    Ok(StackCache {
      buckets: RwLock::new(Buckets::default()),
      capturer: FrameCapturer::new(&self.config, self.source),
      symbolizer: self.symbolizer,
    })
  }

  #[must_use]
  pub fn frame_source(mut self, source: Arc<dyn FrameSource>) -> Self {
    self.source = source;
    self
  }

  #[must_use]
  pub fn new() -> Self {
    Self {
      config: CacheConfig::default(),
      source: Arc::new(NativeFrames),
      symbolizer: Arc::new(NativeSymbolizer),
    }
  }

  #[must_use]
  pub fn symbolizer(mut self, symbolizer: Arc<dyn Symbolizer>) -> Self {
    self.symbolizer = symbolizer;
    self
  }

  #[must_use]
  pub fn with_config(mut self, config: CacheConfig) -> Self {
    self.config = config;
    self
  }
}

/// Deduplicating cache of captured call stacks.
///
/// Buckets are keyed by fingerprint and chain every distinct stack sharing
/// that fingerprint. The cache holds only weak references: an entry lives
/// exactly as long as some `Stack` handle does, and dead references are
/// purged lazily whenever their bucket is next written.
#[derive(Debug)]
pub struct StackCache {
  buckets: RwLock<Buckets>,
  capturer: FrameCapturer,
  symbolizer: Arc<dyn Symbolizer>,
}

impl Default for StackCache {
  fn default() -> Self {
    Self::new()
  }
}

impl StackCache {
  /// Number of references, live or dead, chained under `fingerprint`.
  #[must_use]
  pub fn bucket_len(&self, fingerprint: Fingerprint) -> usize {
    self.read_buckets().get(&fingerprint).map_or(0, Vec::len)
  }

  #[must_use]
  pub fn builder() -> StackCacheBuilder {
    StackCacheBuilder::new()
  }

  /// Capture the caller's stack, dropping `skip` additional frames, and
  /// return the shared entry for it.
  #[inline(never)]
  #[must_use]
  pub fn capture(&self, skip: usize) -> Stack {
    let anchor = Self::capture as fn(&Self, usize) -> Stack as usize;
    self.capture_from(skip, anchor)
  }

  /// Capture relative to the function whose entry address is `anchor`.
  pub(crate) fn capture_from(&self, skip: usize, anchor: usize) -> Stack {
    let frames = self.capturer.capture(skip, Some(anchor));
    let fingerprint = fingerprint(&frames);
    self.get_or_create(&frames, fingerprint)
  }

  /// Purge every dead reference and drop emptied buckets.
  ///
  /// Returns the number of references removed.
  pub fn compact(&self) -> usize {
    let mut buckets = self.write_buckets();
    let mut removed = 0;

    buckets.retain(|_, bucket| {
      let before = bucket.len();
      bucket.retain(|weak| weak.strong_count() > 0);
      removed += before - bucket.len();
      !bucket.is_empty()
    });

    if removed > 0 {
      debug!(removed, "compacted stack cache");
    }

    removed
  }

  /// Return the entry for `frames`, inserting one if no live entry matches.
  ///
  /// `fingerprint` must be `fingerprint(frames)` for lookups to find
  /// entries inserted through `capture`.
  #[must_use]
  pub fn get_or_create(
    &self,
    frames: &[usize],
    fingerprint: Fingerprint,
  ) -> Stack {
    if let Some(found) = self.lookup(frames, fingerprint) {
      return found;
    }

    // Built before taking the write lock to keep the critical section short.
    let candidate =
      Arc::new(StackEntry::new(frames, Arc::clone(&self.symbolizer)));

    let mut buckets = self.write_buckets();
    let bucket = buckets.entry(fingerprint).or_default();

    let before = bucket.len();
    let mut found = None;

    bucket.retain(|weak| match weak.upgrade() {
      Some(entry) => {
        if found.is_none() && entry.matches(frames) {
          found = Some(entry);
        }
        true
      }
      None => false,
    });

    let removed = before - bucket.len();

    if removed > 0 {
      debug!(fingerprint, removed, "purged dead stack references");
    }

    if let Some(entry) = found {
      return Stack::from(entry);
    }

    bucket.push(Arc::downgrade(&candidate));

    trace!(
      fingerprint,
      depth = frames.len(),
      chain = bucket.len(),
      "cached new stack"
    );

    Stack::from(candidate)
  }

  #[must_use]
  pub fn new() -> Self {
    Self {
      buckets: RwLock::new(Buckets::default()),
      capturer: FrameCapturer::new(
        &CacheConfig::default(),
        Arc::new(NativeFrames),
      ),
      symbolizer: Arc::new(NativeSymbolizer),
    }
  }

  #[must_use]
  pub fn pool(&self) -> &ScratchPool {
    self.capturer.pool()
  }

  #[must_use]
  pub fn stats(&self) -> CacheStats {
    let buckets = self.read_buckets();
    let mut stats = CacheStats {
      buckets: buckets.len(),
      ..CacheStats::default()
    };

    for weak in buckets.values().flatten() {
      if weak.strong_count() > 0 {
        stats.live_entries += 1;
      } else {
        stats.dead_entries += 1;
      }
    }

    stats
  }

  /// Build a cache from `config`, falling back to the defaults when the
  /// configuration is rejected.
  #[must_use]
  pub fn with_config(config: CacheConfig) -> Self {
    match Self::builder().with_config(config).build() {
      Ok(cache) => cache,
      Err(err) => {
        warn!(error = %err, "invalid stack cache config, using defaults");
        Self::new()
      }
    }
  }

  fn lookup(
    &self,
    frames: &[usize],
    fingerprint: Fingerprint,
  ) -> Option<Stack> {
    let buckets = self.read_buckets();

    buckets
      .get(&fingerprint)?
      .iter()
      .filter_map(Weak::upgrade)
      .find(|entry| entry.matches(frames))
      .map(Stack::from)
  }

  fn read_buckets(&self) -> RwLockReadGuard<'_, Buckets> {
    match self.buckets.read() {
      Ok(guard) => guard,
      Err(err) => err.into_inner(),
    }
  }

  fn write_buckets(&self) -> RwLockWriteGuard<'_, Buckets> {
    match self.buckets.write() {
      Ok(guard) => guard,
      Err(err) => err.into_inner(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug)]
  struct Labels;

  impl Symbolizer for Labels {
    fn resolve(&self, ip: usize, out: &mut Vec<FrameMetadata>) {
      out.push(FrameMetadata::new("test.rs", format!("f{ip}"), 1));
    }
  }

  fn cache() -> StackCache {
    StackCache::builder()
      .symbolizer(Arc::new(Labels))
      .build()
      .expect("valid default config")
  }

  #[inline(never)]
  fn capture_here(cache: &StackCache) -> Stack {
    cache.capture(0)
  }

  #[test]
  fn same_call_site_shares_entry() {
    let cache = StackCache::new();
    let stacks: Vec<Stack> = (0..2).map(|_| capture_here(&cache)).collect();

    assert!(!stacks[0].is_empty());
    assert!(stacks[0].ptr_eq(&stacks[1]));
    assert_eq!(cache.stats().live_entries, 1);
  }

  #[test]
  fn different_call_sites_get_distinct_entries() {
    let cache = StackCache::new();
    let first = cache.capture(0);
    let second = cache.capture(0);

    assert!(!first.ptr_eq(&second));
    assert_ne!(first.frames(), second.frames());
  }

  #[test]
  fn identical_sequences_are_deduplicated() {
    let cache = cache();
    let frames = [0x10, 0x20, 0x30];

    let first = cache.get_or_create(&frames, fingerprint(&frames));
    let second = cache.get_or_create(&frames, fingerprint(&frames));

    assert!(first.ptr_eq(&second));
    assert_eq!(cache.bucket_len(fingerprint(&frames)), 1);
  }

  #[test]
  fn colliding_fingerprints_keep_stacks_apart() {
    let cache = cache();
    let fp = 7;
    let a = [1, 2, 3];
    let b = [4, 5];

    let stack_a = cache.get_or_create(&a, fp);
    let stack_b = cache.get_or_create(&b, fp);

    assert!(!stack_a.ptr_eq(&stack_b));
    assert_eq!(cache.bucket_len(fp), 2);

    assert!(cache.get_or_create(&a, fp).ptr_eq(&stack_a));
    assert!(cache.get_or_create(&b, fp).ptr_eq(&stack_b));
    assert_eq!(stack_a.frames(), &a);
    assert_eq!(stack_b.frames(), &b);
    assert_eq!(cache.bucket_len(fp), 2);
  }

  #[test]
  fn genuinely_colliding_sequences_stay_distinct() {
    let cache = cache();
    // 31 * 1 + 0 == 31 * 0 + 31, so both hash alike.
    let a = [1, 0];
    let b = [0, 31];
    assert_eq!(fingerprint(&a), fingerprint(&b));

    let stack_a = cache.get_or_create(&a, fingerprint(&a));
    let stack_b = cache.get_or_create(&b, fingerprint(&b));

    assert!(!stack_a.ptr_eq(&stack_b));
    assert_eq!(cache.bucket_len(fingerprint(&a)), 2);
    assert_eq!(stack_a.formatted(), "\ntest.rs:1 f1\ntest.rs:1 f0");
    assert_eq!(stack_b.formatted(), "\ntest.rs:1 f0\ntest.rs:1 f31");
  }

  #[test]
  fn cache_does_not_keep_entries_alive() {
    let cache = cache();
    let frames = [9, 9, 9];
    let fp = fingerprint(&frames);

    let stack = cache.get_or_create(&frames, fp);
    let weak = stack.downgrade();
    drop(stack);

    assert!(weak.upgrade().is_none());
    assert_eq!(
      cache.stats(),
      CacheStats {
        buckets: 1,
        dead_entries: 1,
        live_entries: 0,
      }
    );

    let fresh = cache.get_or_create(&frames, fp);
    assert_eq!(fresh.frames(), &frames);
    assert_eq!(cache.bucket_len(fp), 1);
  }

  #[test]
  fn insertion_compacts_dead_references_only() {
    let cache = cache();
    let fp = 42;

    let live = cache.get_or_create(&[1], fp);
    let dead = cache.get_or_create(&[2], fp);
    drop(cache.get_or_create(&[3], fp));
    drop(dead);
    assert_eq!(cache.bucket_len(fp), 3);

    let newcomer = cache.get_or_create(&[4], fp);
    assert_eq!(cache.bucket_len(fp), 2);

    assert!(cache.get_or_create(&[1], fp).ptr_eq(&live));
    assert!(cache.get_or_create(&[4], fp).ptr_eq(&newcomer));
    assert_eq!(live.formatted(), "\ntest.rs:1 f1");
  }

  #[test]
  fn compact_sweeps_every_bucket() {
    let cache = cache();
    let keep = cache.get_or_create(&[1, 1], 1);
    drop(cache.get_or_create(&[2, 2], 1));
    drop(cache.get_or_create(&[3, 3], 2));

    assert_eq!(cache.compact(), 2);
    assert_eq!(
      cache.stats(),
      CacheStats {
        buckets: 1,
        dead_entries: 0,
        live_entries: 1,
      }
    );
    assert!(cache.get_or_create(&[1, 1], 1).ptr_eq(&keep));
    assert_eq!(cache.compact(), 0);
  }

  #[test]
  fn concurrent_first_captures_create_one_entry() {
    const THREADS: usize = 16;

    let cache = cache();
    let frames = [0xaa, 0xbb, 0xcc, 0xdd];
    let fp = fingerprint(&frames);
    let barrier = Barrier::new(THREADS);

    let stacks: Vec<Stack> = thread::scope(|scope| {
      let handles: Vec<_> = (0..THREADS)
        .map(|_| {
          scope.spawn(|| {
            barrier.wait();
            cache.get_or_create(&frames, fp)
          })
        })
        .collect();

      handles
        .into_iter()
        .map(|handle| handle.join().expect("capture thread panicked"))
        .collect()
    });

    assert!(stacks.iter().all(|stack| stack.ptr_eq(&stacks[0])));
    assert_eq!(cache.bucket_len(fp), 1);
    assert_eq!(cache.stats().live_entries, 1);
  }

  #[test]
  fn concurrent_native_captures_share_call_site_entry() {
    const THREADS: usize = 8;

    let cache = StackCache::new();
    let barrier = Barrier::new(THREADS);

    let stacks: Vec<Stack> = thread::scope(|scope| {
      let handles: Vec<_> = (0..THREADS)
        .map(|_| {
          scope.spawn(|| {
            barrier.wait();
            capture_here(&cache)
          })
        })
        .collect();

      handles
        .into_iter()
        .map(|handle| handle.join().expect("capture thread panicked"))
        .collect()
    });

    // Spawned threads share one entry function, so one stack shape.
    assert!(stacks.iter().all(|stack| stack.ptr_eq(&stacks[0])));
    assert_eq!(cache.stats().live_entries, 1);
  }

  #[test]
  fn capture_returns_scratch_buffer_to_pool() {
    let cache = StackCache::new();
    let _stack = cache.capture(0);
    assert_eq!(cache.pool().idle(), 1);
    let _again = cache.capture(0);
    assert_eq!(cache.pool().idle(), 1);
  }

  #[test]
  fn native_stack_formats_with_caller() {
    let cache = StackCache::new();
    let stack = capture_here(&cache);
    let text = stack.formatted();

    assert!(text.starts_with('\n'));
    assert_eq!(text.lines().count(), stack.resolved().len() + 1);
    assert_eq!(text, stack.formatted());
  }

  #[test]
  fn invalid_config_falls_back_to_defaults() {
    let cache =
      StackCache::with_config(CacheConfig::default().with_max_frames(0));
    assert!(!cache.capture(0).is_empty());
  }
}
