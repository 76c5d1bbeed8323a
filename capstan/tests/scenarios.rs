//! End-to-end command scenarios: literal wire bytes in, literal wire bytes
//! out, with the step interrupt driven by hand where a move is involved.

use capstan::motor::{MotorBank, MotorChannel};
use capstan::protocol::{
    parse_exact, Method, MotorConfig, MotorEnable, MotorMove, MotorParams, MotorStatus, Property,
    SystemEnable,
};
use capstan::sim::{decode_stream, encode_frame, encode_frame_raw, Loopback, ManualClock, SimDriver, SimPin};
use capstan::{step_tick, Clock, DriverPower, Motor, Pin, System, IDENTITY};

type TestSystem<'a> = System<'a, Loopback, ManualClock, SimDriver, SimPin, 3>;

fn channels() -> MotorBank<SimPin, 3> {
    MotorBank::new(std::array::from_fn(|_| {
        MotorChannel::new(SimPin::new(), SimPin::new())
    }))
}

fn build(bank: &MotorBank<SimPin, 3>) -> (TestSystem<'_>, ManualClock) {
    build_with_drivers(bank, [true; 3])
}

fn build_with_drivers(
    bank: &MotorBank<SimPin, 3>,
    online: [bool; 3],
) -> (TestSystem<'_>, ManualClock) {
    let clock = ManualClock::new();
    let motors =
        std::array::from_fn(|i| Motor::new(i as u8, SimDriver::new(online[i]), SimPin::new(), &bank[i]));
    let mut sys = System::new(
        Loopback::new(),
        clock.clone(),
        motors,
        DriverPower::new(SimPin::new()),
    );
    sys.init();
    (sys, clock)
}

fn roundtrip(sys: &mut TestSystem<'_>, wire: &[u8]) -> Vec<capstan::Frame> {
    sys.link.feed(wire);
    sys.tick(0);
    decode_stream(&sys.link.take_written())
}

fn enable_motor(sys: &mut TestSystem<'_>, id: u8) {
    let replies = roundtrip(
        sys,
        &encode_frame(1000 + id as u16, Method::Set, Property::MotEna, &MotorEnable { id, enable: true }),
    );
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].header.method(), Method::Ack as u8);
}

#[test]
fn firmware_identity() {
    // GET FW_INFO with seq=1 stuffs to these exact six bytes.
    let wire = encode_frame_raw(1, Method::Get, Property::FwInfo, &[]);
    assert_eq!(wire, [0x03, 0x1E, 0x01, 0x02, 0x1F, 0x00]);

    let chans = channels();
    let (mut sys, _) = build(&chans);
    let replies = roundtrip(&mut sys, &wire);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].header.sequence, 1);
    assert_eq!(replies[0].header.method(), Method::Ack as u8);
    assert_eq!(replies[0].header.property(), Property::FwInfo as u8);

    let mut expected = IDENTITY.as_bytes().to_vec();
    expected.push(0);
    assert_eq!(replies[0].payload(), expected);
}

#[test]
fn system_enable_disable_cascade() {
    let chans = channels();
    let (mut sys, _) = build(&chans);

    let replies = roundtrip(
        &mut sys,
        &encode_frame(2, Method::Set, Property::SysEna, &SystemEnable { enable: true }),
    );
    assert_eq!(replies.len(), 1);
    assert_eq!(
        parse_exact::<SystemEnable>(replies[0].payload()).unwrap(),
        SystemEnable { enable: true }
    );
    assert!(sys.drv.is_enabled());

    enable_motor(&mut sys, 0);

    // A move parked behind a paused interrupt...
    chans[0].set_lock(true);
    let replies = roundtrip(
        &mut sys,
        &encode_frame(
            4,
            Method::Set,
            Property::MotMov,
            &MotorMove {
                id: 0,
                steps: 100_000,
                interval: 1_000,
            },
        ),
    );
    assert!(replies.is_empty(), "move ack must be deferred");

    // ...is rejected when the rail goes down, before the SYS_ENA ack.
    let replies = roundtrip(
        &mut sys,
        &encode_frame(5, Method::Set, Property::SysEna, &SystemEnable { enable: false }),
    );
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].header.sequence, 4);
    assert_eq!(replies[0].header.method(), Method::Rej as u8);
    assert_eq!(replies[0].payload(), b"Motor Disabled");
    assert_eq!(replies[1].header.sequence, 5);
    assert_eq!(
        parse_exact::<SystemEnable>(replies[1].payload()).unwrap(),
        SystemEnable { enable: false }
    );
    assert!(!sys.drv.is_enabled());
    for motor in &sys.motors {
        assert!(!motor.enabled());
    }
}

#[test]
fn move_ack_arrives_on_completion() {
    let chans = channels();
    let (mut sys, clock) = build(&chans);
    enable_motor(&mut sys, 0);

    let replies = roundtrip(
        &mut sys,
        &encode_frame(
            42,
            Method::Set,
            Property::MotMov,
            &MotorMove {
                id: 0,
                steps: 1000,
                interval: 200,
            },
        ),
    );
    assert!(replies.is_empty(), "no immediate reply to an accepted move");

    // Drive the interrupt: one dequeue tick plus one tick per toggle.
    for _ in 0..1001 {
        clock.advance(200);
        step_tick(&chans, clock.monotonic_micros());
    }
    assert_eq!(chans[0].step.toggles(), 1000);
    assert!(chans[0].dir.read(), "positive steps drive DIR high");

    sys.tick(0);
    let replies = decode_stream(&sys.link.take_written());
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].header.sequence, 42);
    assert_eq!(replies[0].header.method(), Method::Ack as u8);
    assert_eq!(replies[0].header.property(), Property::MotMov as u8);

    // And never again.
    sys.tick(0);
    assert!(decode_stream(&sys.link.take_written()).is_empty());
}

#[test]
fn queue_full_rejects_the_257th_move() {
    let chans = channels();
    let (mut sys, _) = build(&chans);
    enable_motor(&mut sys, 0);
    chans[0].set_lock(true);

    for seq in 1..=257u16 {
        sys.link.feed(&encode_frame(
            seq,
            Method::Set,
            Property::MotMov,
            &MotorMove {
                id: 0,
                steps: 1,
                interval: 1,
            },
        ));
    }
    sys.tick(0);
    let replies = decode_stream(&sys.link.take_written());
    assert_eq!(replies.len(), 1, "first 256 moves are accepted silently");
    assert_eq!(replies[0].header.sequence, 257);
    assert_eq!(replies[0].header.method(), Method::Rej as u8);
    assert_eq!(replies[0].payload(), b"Motor Queue Full");
}

#[test]
fn wrong_payload_size_rejected() {
    let chans = channels();
    let (mut sys, _) = build(&chans);
    let replies = roundtrip(
        &mut sys,
        &encode_frame_raw(9, Method::Set, Property::MotMov, &[0; 6]),
    );
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].header.method(), Method::Rej as u8);
    assert_eq!(replies[0].header.property(), Property::MotMov as u8);
    assert_eq!(replies[0].payload(), b"Invalid payload");
}

#[test]
fn corrupt_checksum_changes_nothing() {
    let chans = channels();
    let (mut sys, _) = build(&chans);

    // A well-formed SET SYS_ENA {true}, payload bit flipped after sealing.
    let mut frame = capstan::Frame::new();
    frame.header = capstan::Header::new(7, Method::Set, Property::SysEna);
    frame.set_payload(&[1]);
    frame.seal();
    let mut raw = [0u8; 254];
    let n = frame.write_to(&mut raw);
    raw[4] ^= 0x02;
    let mut wire = [0u8; 256];
    let wire_len = capstan::cobs::encode(&raw[..n], &mut wire).unwrap();

    let replies = roundtrip(&mut sys, &wire[..wire_len]);
    assert!(replies.is_empty(), "corrupt frames are dropped silently");
    assert!(!sys.drv.is_enabled(), "corrupt frames must not act");

    // The link stays usable.
    let replies = roundtrip(
        &mut sys,
        &encode_frame(8, Method::Set, Property::SysEna, &SystemEnable { enable: true }),
    );
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].header.sequence, 8);
    assert!(sys.drv.is_enabled());
}

#[test]
fn config_get_set_roundtrip() {
    let chans = channels();
    let (mut sys, _) = build(&chans);

    let replies = roundtrip(
        &mut sys,
        &encode_frame(11, Method::Get, Property::MotCfg, &capstan::protocol::MotorHeader { id: 1 }),
    );
    assert_eq!(
        parse_exact::<MotorConfig>(replies[0].payload()).unwrap(),
        MotorConfig {
            id: 1,
            params: MotorParams::default(),
        }
    );

    let params = MotorParams {
        micro_steps: 16,
        stall_sensitivity: 80,
        rms_current: 750,
    };
    let replies = roundtrip(
        &mut sys,
        &encode_frame(12, Method::Set, Property::MotCfg, &MotorConfig { id: 1, params }),
    );
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].header.method(), Method::Ack as u8);
    assert_eq!(
        parse_exact::<MotorConfig>(replies[0].payload()).unwrap(),
        MotorConfig { id: 1, params }
    );
    assert_eq!(sys.motors[1].config, params);
}

#[test]
fn unknown_motor_rejected() {
    let chans = channels();
    let (mut sys, _) = build(&chans);
    let replies = roundtrip(
        &mut sys,
        &encode_frame(21, Method::Get, Property::MotEna, &capstan::protocol::MotorHeader { id: 9 }),
    );
    assert_eq!(replies[0].header.method(), Method::Rej as u8);
    assert_eq!(replies[0].payload(), b"No such motor");
}

#[test]
fn offline_motor_cannot_enable_or_configure() {
    let chans = channels();
    let (mut sys, _) = build_with_drivers(&chans, [false, true, true]);

    let replies = roundtrip(
        &mut sys,
        &encode_frame(
            31,
            Method::Set,
            Property::MotEna,
            &MotorEnable {
                id: 0,
                enable: true,
            },
        ),
    );
    assert_eq!(replies[0].header.method(), Method::Rej as u8);
    assert_eq!(replies[0].payload(), b"Motor Offline");

    let replies = roundtrip(
        &mut sys,
        &encode_frame(
            32,
            Method::Set,
            Property::MotCfg,
            &MotorConfig {
                id: 0,
                params: MotorParams::default(),
            },
        ),
    );
    assert_eq!(replies[0].payload(), b"Motor Offline");
}

#[test]
fn unsupported_opcode_names_itself() {
    let chans = channels();
    let (mut sys, _) = build(&chans);
    let replies = roundtrip(
        &mut sys,
        &encode_frame_raw(41, Method::Set, Property::FwInfo, &[]),
    );
    assert_eq!(replies[0].header.method(), Method::Rej as u8);
    assert_eq!(replies[0].header.property(), Property::Na as u8);
    assert_eq!(replies[0].payload(), b"Unsupported command: SET::FW_INFO");
}

#[test]
fn status_reports_live_position() {
    let chans = channels();
    let (mut sys, clock) = build(&chans);
    enable_motor(&mut sys, 2);

    roundtrip(
        &mut sys,
        &encode_frame(
            51,
            Method::Set,
            Property::MotMov,
            &MotorMove {
                id: 2,
                steps: -40,
                interval: 10,
            },
        ),
    );
    for _ in 0..60 {
        clock.advance(10);
        step_tick(&chans, clock.monotonic_micros());
    }

    let replies = roundtrip(
        &mut sys,
        &encode_frame(52, Method::Get, Property::MotStat, &capstan::protocol::MotorHeader { id: 2 }),
    );
    // The completion ack from the drain precedes the status reply.
    let status = replies.last().unwrap();
    assert_eq!(status.header.method(), Method::Ack as u8);
    assert_eq!(
        parse_exact::<MotorStatus>(status.payload()).unwrap(),
        MotorStatus {
            id: 2,
            position: -40,
        }
    );
}

#[test]
fn disconnect_disables_everything() {
    let chans = channels();
    let (mut sys, _) = build(&chans);
    roundtrip(
        &mut sys,
        &encode_frame(61, Method::Set, Property::SysEna, &SystemEnable { enable: true }),
    );
    enable_motor(&mut sys, 0);
    assert!(sys.drv.is_enabled());

    sys.link.connected = false;
    sys.tick(0);
    assert!(!sys.drv.is_enabled());
    assert!(!sys.motors[0].enabled());
}
