//! Runs the capstan firmware core against a simulated board: PTY or stdio
//! for the host link, a thread for the step timer, and in-memory pins and
//! TMC drivers. Host driver tooling can talk to the advertised PTY exactly
//! as it would to the real controller.

mod serial;

use std::time::Duration;

use capstan::sim::{SimDriver, SimPin, WallClock};
use capstan::{step_tick, telemetry, DriverPower, Motor, MotorBank, MotorChannel, Scheduler, System};
use clap::{Parser, ValueEnum};
use tracing::{error, info};

use crate::serial::{Link, PtyLink, SerialError, StdioLink};

const AXES: usize = 3;

type Bank = MotorBank<SimPin, AXES>;
type Emulated = System<'static, Link, WallClock, SimDriver, SimPin, AXES>;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SerialMode {
    /// Allocate a pseudo-terminal and print its path.
    Pty,
    /// Speak the protocol over stdin/stdout.
    Stdio,
}

#[derive(Parser, Debug)]
#[command(name = "capstan-emulator", about, version)]
struct Args {
    /// Host link flavor.
    #[arg(long, value_enum, default_value_t = SerialMode::Pty)]
    serial: SerialMode,

    /// Step timer rate in Hz (best effort on a host OS).
    #[arg(long, default_value_t = 10_000)]
    isr_hz: u32,

    /// More -v, more logging (stderr).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, thiserror::Error)]
enum EmulatorError {
    #[error(transparent)]
    Serial(#[from] SerialError),
}

fn main() -> Result<(), EmulatorError> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::level_filters::LevelFilter::INFO,
        1 => tracing::level_filters::LevelFilter::DEBUG,
        _ => tracing::level_filters::LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_ansi(false)
        .with_target(false)
        .init();

    let link = match args.serial {
        SerialMode::Pty => {
            let (pty, path) = PtyLink::open()?;
            info!("serial port ready at {}", path.display());
            // Scripts pick the path up from stdout in this mode.
            println!("{}", path.display());
            Link::Pty(pty)
        }
        SerialMode::Stdio => Link::Stdio(StdioLink::open()),
    };

    let clock = WallClock::new();
    let bank: &'static Bank = Box::leak(Box::new(MotorBank::new(std::array::from_fn(|_| {
        MotorChannel::new(SimPin::new(), SimPin::new())
    }))));

    spawn_step_timer(bank, clock, args.isr_hz);

    let motors = std::array::from_fn(|i| {
        Motor::new(i as u8, SimDriver::new(true), SimPin::new(), &bank[i])
    });
    let mut sys = Emulated::new(link, clock, motors, DriverPower::new(SimPin::new()));
    sys.init();

    let mut scheduler: Scheduler<WallClock, Emulated, 8> = Scheduler::new(clock);
    if scheduler.add_micro(Emulated::agent_task).is_err()
        || scheduler
            .add_recurrent(telemetry::PERF_PERIOD, telemetry::perf_task)
            .is_err()
        || scheduler
            .add_recurrent(telemetry::POS_PERIOD, telemetry::pos_task)
            .is_err()
    {
        rescue(&mut sys, "scheduler task list exhausted");
    }

    info!("emulator running, {} axes, isr {} Hz", AXES, args.isr_hz);
    scheduler.run(&mut sys)
}

/// The stand-in for the hardware step timer: a paced loop on its own
/// thread, sleeping when the next tick is far enough away and spinning the
/// last stretch.
fn spawn_step_timer(bank: &'static Bank, clock: WallClock, isr_hz: u32) {
    use capstan::Clock;

    let period = (1_000_000u64 / isr_hz.max(1) as u64).max(1);
    std::thread::spawn(move || {
        let mut next = clock.monotonic_micros();
        loop {
            let now = clock.monotonic_micros();
            if now >= next {
                step_tick(bank, now);
                next += period;
                if now > next + 1_000_000 {
                    // Fell far behind (laptop asleep?); drop the backlog.
                    next = now;
                }
            } else if next - now > 1_000 {
                std::thread::sleep(Duration::from_micros(next - now - 500));
            } else {
                std::hint::spin_loop();
            }
        }
    });
}

/// Terminal fault state: the rail is cut and the reason is repeated on the
/// wire until the process is restarted.
fn rescue(sys: &mut Emulated, reason: &str) -> ! {
    error!("entering rescue mode: {reason}");
    sys.drv.disable();
    loop {
        sys.tx.log(&mut sys.link, reason);
        std::thread::sleep(Duration::from_millis(800));
    }
}
