use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use schedule_recv::periodic_ms;

/// How often a sleeping job looks at the shutdown flag.
pub const TICK_MS: u32 = 1000;

/// Sleeps for `duration`, waking every `tick_ms` to check `shutdown`.  Returns false when the sleep
/// was cut short by a shutdown request.
pub fn sleep_unless_shutdown(duration: Duration, tick_ms: u32, shutdown: &AtomicBool) -> bool {
  let deadline = Instant::now() + duration;
  let tick = periodic_ms(tick_ms);
  loop {
    if shutdown.load(Ordering::SeqCst) {
      return false;
    }
    if Instant::now() >= deadline {
      return true;
    }
    if tick.recv().is_err() {
      thread::sleep(Duration::from_millis(tick_ms as u64));
    }
  }
}

/// Runs `cycle` right away and then once every `interval` until `shutdown` is set.  A cycle that
/// panics is logged and the next one still runs.
pub fn run_every<F: FnMut()>(name: &str, interval: Duration, tick_ms: u32, shutdown: &AtomicBool,
                             mut cycle: F) {
  loop {
    if shutdown.load(Ordering::SeqCst) {
      break;
    }
    if panic::catch_unwind(AssertUnwindSafe(|| cycle())).is_err() {
      error!("{} cycle panicked, continuing with the next one", name);
    }
    debug!("Next {} cycle in {:?}", name, interval);
    if !sleep_unless_shutdown(interval, tick_ms, shutdown) {
      break;
    }
  }
  info!("{} stopped", name);
}
