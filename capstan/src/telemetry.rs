//! Periodic reporters. Neither is needed for correctness; both ride the
//! scheduler as Recurrent tasks.

use core::fmt::Write as _;

use heapless::String;

use crate::agent::System;
use crate::clock::{elapsed, Clock, Micros};
use crate::fmt::info;
use crate::pin::Pin;
use crate::scheduler::Control;
use crate::tmc::Tmc2209;
use crate::transport::Transport;

/// Scheduler load report cadence.
pub const PERF_PERIOD: Micros = 10_000_000;
/// Position broadcast cadence, roughly a display frame.
pub const POS_PERIOD: Micros = 16_000;

/// Report scheduler utilisation and pass rate over the last window, then
/// start a new window. Goes to the host as a `LOG` frame and to the local
/// log.
pub fn perf_task<T, K, D, P, const M: usize>(
    sys: &mut System<'_, T, K, D, P, M>,
    _ctl: &mut Control,
    now: Micros,
) where
    T: Transport,
    K: Clock,
    D: Tmc2209,
    P: Pin,
{
    let duration = elapsed(now, sys.perf.since);
    let utilization = 100.0 * sys.perf.utilization(duration);
    let frequency = sys.perf.frequency_khz(duration);
    let mut line = String::<96>::new();
    let _ = write!(
        line,
        "PERF util={utilization:.2}% loop={frequency:.2}kHz busy={}us",
        sys.perf.busy
    );
    info!("{}", line.as_str());
    sys.tx.log(&mut sys.link, &line);
    sys.perf.reset(now);
}

/// Broadcast the live step position of every axis while the driver rail is
/// up. `SYN` with sequence 0: nothing correlates, the host just listens.
pub fn pos_task<T, K, D, P, const M: usize>(
    sys: &mut System<'_, T, K, D, P, M>,
    _ctl: &mut Control,
    _now: Micros,
) where
    T: Transport,
    K: Clock,
    D: Tmc2209,
    P: Pin,
{
    if !sys.drv.is_enabled() {
        return;
    }
    let mut line = String::<96>::new();
    let _ = write!(line, "POS");
    for motor in &sys.motors {
        let _ = write!(line, " {}:{}", motor.addr, motor.channel.position());
    }
    sys.tx.syn(&mut sys.link, &line);
}
