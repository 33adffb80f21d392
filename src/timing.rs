use std::time::Instant;
use tracing::debug;

/// Run `f`, logging its wall time under `job` at debug level.
pub fn timed<T>(job: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let value = f();
    debug!(
        "COMPLETED [{job}] in {:.3} ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
    value
}
