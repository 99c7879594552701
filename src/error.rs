use super::*;

type Cause = Arc<dyn StdError + Send + Sync>;

/// An error carrying a message, an optional cause, ordered metadata and an
/// optional shared stack.
///
/// Every builder method returns a new value; the receiver is left as is.
#[derive(Clone, Debug)]
pub struct Error {
  cause: Option<Cause>,
  message: Arc<str>,
  metadata: Vec<(Arc<str>, Value)>,
  stack: Option<Stack>,
}

impl Error {
  #[must_use]
  pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
    self.cause.as_deref()
  }

  /// Lift any error into an `Error`. An `Error` is returned as is; anything
  /// else is wrapped with an empty message, so it displays unchanged.
  #[must_use]
  pub fn from_std<E>(err: E) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    let boxed: Box<dyn StdError + Send + Sync> = Box::new(err);

    match boxed.downcast::<Self>() {
      Ok(traced) => *traced,
      Err(foreign) => Self {
        cause: Some(Arc::from(foreign)),
        ..Self::new("")
      },
    }
  }

  #[must_use]
  pub fn message(&self) -> &str {
    &self.message
  }

  #[must_use]
  pub fn metadata(&self) -> &[(Arc<str>, Value)] {
    &self.metadata
  }

  #[must_use]
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      cause: None,
      message: Arc::from(message.into()),
      metadata: Vec::new(),
      stack: None,
    }
  }

  #[must_use]
  pub fn stack(&self) -> Option<&Stack> {
    self.stack.as_ref()
  }

  /// Formatted stack text, or `""` when no stack was captured.
  #[must_use]
  pub fn stack_trace(&self) -> &str {
    self.stack.as_ref().map(Stack::formatted).unwrap_or_default()
  }

  /// Attach `key = value`. Values that fail to serialize are recorded as
  /// their serialization error message.
  #[must_use]
  pub fn with(&self, key: &str, value: impl Serialize) -> Self {
    let value = serde_json::to_value(value)
      .unwrap_or_else(|err| Value::String(err.to_string()));

    let mut metadata = Vec::with_capacity(self.metadata.len() + 1);
    metadata.extend(self.metadata.iter().cloned());
    metadata.push((Arc::from(key), value));

    Self {
      metadata,
      ..self.clone()
    }
  }

  /// Attach the caller's stack, replacing any stack already present.
  #[inline(never)]
  #[must_use]
  pub fn with_stack(&self) -> Self {
    let anchor = Self::with_stack as fn(&Self) -> Self as usize;

    Self {
      stack: Some(default_cache().capture_from(0, anchor)),
      ..self.clone()
    }
  }

  #[must_use]
  pub(crate) fn with_captured_stack(mut self, stack: Stack) -> Self {
    self.stack = Some(stack);
    self
  }

  /// Wrap `cause` with an additional message.
  #[must_use]
  pub fn wrap<E>(cause: E, message: impl Into<String>) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    Self {
      cause: Some(Arc::new(cause)),
      ..Self::new(message)
    }
  }
}

impl Display for Error {
  /// `{}` prints the message chain; `{:#}` appends the stack trace.
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match &self.cause {
      None => f.write_str(&self.message)?,
      Some(cause) if self.message.is_empty() => write!(f, "{cause}")?,
      Some(cause) => write!(f, "{}: {cause}", self.message)?,
    }

    if f.alternate() {
      f.write_str(self.stack_trace())?;
    }

    Ok(())
  }
}

impl StdError for Error {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    self
      .cause
      .as_deref()
      .map(|cause| cause as &(dyn StdError + 'static))
  }
}

impl Serialize for Error {
  /// Structured form: `msg`, each metadata pair, `stacktrace` when captured,
  /// and `cause` as text.
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut state = serializer.serialize_map(None)?;
    state.serialize_entry("msg", self.message())?;

    for (key, value) in &self.metadata {
      state.serialize_entry(&**key, value)?;
    }

    let stack_trace = self.stack_trace();
    if !stack_trace.is_empty() {
      state.serialize_entry("stacktrace", stack_trace)?;
    }

    if let Some(cause) = &self.cause {
      state.serialize_entry("cause", &cause.to_string())?;
    }

    state.end()
  }
}
