use super::*;

const ENV_INITIAL_FRAMES: &str = "TRACECACHE_INITIAL_FRAMES";
const ENV_MAX_FRAMES: &str = "TRACECACHE_MAX_FRAMES";
const ENV_POOL_CAPACITY: &str = "TRACECACHE_POOL_CAPACITY";

/// Rejected cache configurations.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
  #[error("initial_frames ({initial}) exceeds max_frames ({max})")]
  InitialExceedsMax { initial: usize, max: usize },
  #[error("{field} must be greater than zero")]
  Zero { field: &'static str },
}

/// Controls how stacks are captured and how many scratch buffers are kept.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CacheConfig {
  /// Frame capacity of a freshly allocated scratch buffer.
  pub initial_frames: usize,
  /// Hard ceiling for buffer growth; deeper stacks are truncated here.
  pub max_frames: usize,
  /// Number of idle scratch buffers retained for reuse.
  pub pool_capacity: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      initial_frames: 128,
      max_frames: 4096,
      pool_capacity: 64,
    }
  }
}

impl CacheConfig {
  /// Defaults overridden by `TRACECACHE_*` environment variables.
  ///
  /// Values that fail to parse are reported and ignored.
  #[must_use]
  pub fn from_env() -> Self {
    let mut config = Self::default();

    if let Some(value) = parse_env(ENV_INITIAL_FRAMES) {
      config.initial_frames = value;
    }

    if let Some(value) = parse_env(ENV_MAX_FRAMES) {
      config.max_frames = value;
    }

    if let Some(value) = parse_env(ENV_POOL_CAPACITY) {
      config.pool_capacity = value;
    }

    config
  }

  /// # Errors
  ///
  /// Returns a `ConfigError` if any size is zero or the initial buffer is
  /// larger than the growth ceiling.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.initial_frames == 0 {
      return Err(ConfigError::Zero {
        field: "initial_frames",
      });
    }

    if self.max_frames == 0 {
      return Err(ConfigError::Zero {
        field: "max_frames",
      });
    }

    if self.pool_capacity == 0 {
      return Err(ConfigError::Zero {
        field: "pool_capacity",
      });
    }

    if self.initial_frames > self.max_frames {
      return Err(ConfigError::InitialExceedsMax {
        initial: self.initial_frames,
        max: self.max_frames,
      });
    }

    Ok(())
  }

  #[must_use]
  pub fn with_initial_frames(mut self, frames: usize) -> Self {
    self.initial_frames = frames;
    self
  }

  #[must_use]
  pub fn with_max_frames(mut self, frames: usize) -> Self {
    self.max_frames = frames;
    self
  }

  #[must_use]
  pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
    self.pool_capacity = capacity;
    self
  }
}

fn parse_env(key: &str) -> Option<usize> {
  let raw = env::var(key).ok()?;

  match raw.trim().parse::<usize>() {
    Ok(value) => Some(value),
    Err(err) => {
      warn!(key, value = %raw, error = %err, "ignoring unparseable setting");
      None
    }
  }
}
