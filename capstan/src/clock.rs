/// Monotonic microsecond timestamp.
///
/// Free-running from an arbitrary epoch. 64 bits wide, so wrap-around is a
/// theoretical concern only (~584k years); arithmetic still uses wrapping
/// operations so that a platform substituting a narrower counter behind the
/// trait keeps working.
pub type Micros = u64;

/// Source of monotonic time.
///
/// The board supplies one of these, typically backed by a free-running
/// hardware timer. Reads must be cheap enough to call from both the main
/// loop and the step interrupt.
pub trait Clock {
    fn monotonic_micros(&self) -> Micros;
}

impl<C: Clock> Clock for &C {
    fn monotonic_micros(&self) -> Micros {
        (*self).monotonic_micros()
    }
}

/// Microseconds elapsed from `since` to `now`, wrap-safe.
pub fn elapsed(now: Micros, since: Micros) -> Micros {
    now.wrapping_sub(since)
}
