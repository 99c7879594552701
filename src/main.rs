use {
  std::io,
  tracecache::{Error, capture_stack, catch_panic, default_cache, log_error},
  tracing_subscriber::EnvFilter,
};

#[derive(Debug)]
struct Timeout;

impl std::fmt::Display for Timeout {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("network timeout")
  }
}

impl std::error::Error for Timeout {}

#[inline(never)]
fn fetch(user_id: u64) -> Result<(), Error> {
  Err(
    Error::wrap(Timeout, "failed to fetch user")
      .with("user_id", user_id)
      .with_stack(),
  )
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .with_writer(io::stderr)
    .init();

  let errors: Vec<Error> = (1..=3).filter_map(|id| fetch(id).err()).collect();

  let Some(first) = errors.first() else {
    return;
  };

  println!("=== plain ===");
  println!("{first}");

  println!("=== with stack ===");
  println!("{first:#}");

  let shared = errors
    .windows(2)
    .all(|pair| match (pair[0].stack(), pair[1].stack()) {
      (Some(a), Some(b)) => a.ptr_eq(b),
      _ => false,
    });
  println!("errors from one call site share a stack: {shared}");

  log_error(first);

  if let Err(err) = catch_panic(|| -> () { panic!("worker crashed") }) {
    println!("recovered: {err}");
  }

  let here = capture_stack(0);
  println!("captured {} frames here", here.frames().len());

  match serde_json::to_string(&default_cache().stats()) {
    Ok(stats) => println!("cache stats: {stats}"),
    Err(err) => eprintln!("failed to encode cache stats: {err}"),
  }

  drop(errors);
  drop(here);
  println!("reclaimed {} references", default_cache().compact());
}
