//! Register-level surface of the TMC2209 stall-guard driver.
//!
//! The UART datagram plumbing lives behind this trait; the core only issues
//! the handful of writes needed to bring a motor up and the one read that
//! proves the driver answers. Writes are fire-and-forget single datagrams,
//! so they are modeled as infallible; `test_connection` is the probe that
//! reports link health.

pub trait Tmc2209 {
    /// 0 when the driver responds on the UART bus.
    fn test_connection(&mut self) -> u8;

    /// Coil current in mA.
    fn rms_current(&mut self, ma: u16);

    /// Microstep resolution; 256 is the full-resolution setting.
    fn microsteps(&mut self, ms: u16);

    /// Stall-guard threshold (SGTHRS). DIAG pulses when the load
    /// measurement falls below twice this value.
    fn sgthrs(&mut self, threshold: u8);

    /// Chopper off-time. 0 disables the output stage entirely; the
    /// datasheet recommends 3..=5 for operation.
    fn toff(&mut self, value: u8);

    /// Comparator blank time select.
    fn blank_time(&mut self, value: u8);

    /// Switch between spread-cycle (true) and stealth-chop (false)
    /// commutation.
    fn en_spread_cycle(&mut self, enable: bool);

    /// Automatic PWM amplitude scaling, required for stealth-chop.
    fn pwm_autoscale(&mut self, enable: bool);

    /// Lower TSTEP bound for cool-step and stall output (20-bit).
    fn tcoolthrs(&mut self, value: u32);

    /// TSTEP threshold for switching to spread-cycle (20-bit).
    fn tpwmthrs(&mut self, value: u32);
}
