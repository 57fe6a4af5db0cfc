use std::cell::Cell;

use embedded_hal::blocking::delay::DelayMs;
use uwb_twr::{
    configs::{Addressing, RangingConfig, SupervisorConfig},
    frame::{MessageType, MESSAGE_TYPE_OFFSET},
    ranging::{Confidence, SPEED_OF_LIGHT_AIR, SPEED_OF_LIGHT_VACUUM},
    sim::{SimulatedAnchor, SimulatedTimer},
    time::TIME_MODULUS,
    Clock,
    ErrorKind,
    FrameCodec,
    Session,
    Supervisor,
};


struct StoppedClock;

impl Clock for StoppedClock {
    fn now_ms(&mut self) -> u64 {
        0
    }
}

struct CountingDelay<'a>(&'a Cell<u64>);

impl DelayMs<u32> for CountingDelay<'_> {
    fn delay_ms(&mut self, ms: u32) {
        self.0.set(self.0.get() + u64::from(ms));
    }
}


fn vacuum() -> RangingConfig {
    RangingConfig {
        speed_of_light: SPEED_OF_LIGHT_VACUUM,
        ..RangingConfig::default()
    }
}

#[test]
fn first_exchange_matches_reference_timestamps() {
    let config = vacuum();
    let mut radio = SimulatedAnchor::new(100, 100);
    let mut codec = FrameCodec::new(Addressing::default());
    let mut timer = SimulatedTimer::new(1_000);

    let first_poll = FrameCodec::new(Addressing::default()).encode_poll();
    assert_eq!(first_poll[MESSAGE_TYPE_OFFSET], 0x61);
    assert_eq!(first_poll[2], 0);

    let measurement = Session::new(&mut radio, &mut (), &mut codec, &config)
        .run(&mut timer)
        .unwrap();

    assert_eq!(measurement.sequence_number, 0);
    assert_eq!(measurement.timestamps.poll_tx.value(), 0);
    assert_eq!(measurement.timestamps.resp_rx.value(), 300);
    assert_eq!(measurement.timestamps.poll_rx_remote.value(), 1000);
    assert_eq!(measurement.timestamps.resp_tx_remote.value(), 1100);
    assert!((measurement.distance.time_of_flight.dtu - 100.0).abs() < 1e-9);
    assert!((measurement.distance.meters - 0.469).abs() < 0.001);

    let report = radio.last_final().unwrap();
    assert_eq!(report.distance_mm, 469);
    assert_eq!(report.sequence_number, 1);
}

#[test]
fn exchange_across_timestamp_wraparound() {
    let config = vacuum();
    let mut radio = SimulatedAnchor::new(100, 100);
    radio.set_clocks(TIME_MODULUS - 150, TIME_MODULUS - 50);
    let mut codec = FrameCodec::new(Addressing::default());
    let mut timer = SimulatedTimer::new(1_000);

    let measurement = Session::new(&mut radio, &mut (), &mut codec, &config)
        .run(&mut timer)
        .unwrap();

    assert!(measurement.timestamps.resp_rx.value() < measurement.timestamps.poll_tx.value());
    assert_eq!(measurement.timestamps.round_trip(), 300);
    assert_eq!(measurement.timestamps.reply_delay(), 100);
    assert_eq!(measurement.distance.millimeters(), 469);
    assert_eq!(measurement.distance.confidence(), Confidence::Normal);
}

#[test]
fn sequence_numbers_keep_counting_across_sessions() {
    let config = RangingConfig::default();
    let mut radio = SimulatedAnchor::new(640, 65_536);
    let mut codec = FrameCodec::new(Addressing::default());
    let mut timer = SimulatedTimer::new(1_000);

    for cycle in 0..3u8 {
        let measurement = Session::new(&mut radio, &mut (), &mut codec, &config)
            .run(&mut timer)
            .unwrap();

        assert_eq!(measurement.sequence_number, 2 * cycle);
        let expected = 640.0 * uwb_twr::time::DTU_SECONDS * SPEED_OF_LIGHT_AIR;
        assert!((measurement.distance.meters - expected).abs() < 1e-9);
    }

    let sent = radio.sent_types();
    assert_eq!(sent.len(), 6);
    assert!(sent
        .chunks(2)
        .all(|pair| *pair == [MessageType::Poll, MessageType::Final]));
}

#[test]
fn interference_does_not_end_the_exchange() {
    let config = vacuum();
    let mut radio = SimulatedAnchor::new(100, 100);
    radio.inject_garbage(6);
    radio.inject_rx_errors(3);
    let mut codec = FrameCodec::new(Addressing::default());
    let mut timer = SimulatedTimer::new(1_000);

    let measurement = Session::new(&mut radio, &mut (), &mut codec, &config)
        .run(&mut timer)
        .unwrap();

    assert_eq!(measurement.distance.millimeters(), 469);
}

#[test]
fn interference_without_response_times_out() {
    let config = vacuum();
    let mut radio = SimulatedAnchor::new(100, 100);
    radio.inject_garbage(4);
    radio.drop_responses(1);
    let mut codec = FrameCodec::new(Addressing::default());
    let mut timer = SimulatedTimer::new(1_000);

    let error = Session::new(&mut radio, &mut (), &mut codec, &config)
        .run(&mut timer)
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::ResponseTimeout);
    // Roughly the whole window was spent polling
    assert!(timer.polls() >= config.response_timeout / 1_000);
}

#[test]
fn supervisor_recovers_wedged_transceiver() {
    let slept = Cell::new(0);
    let mut supervisor = Supervisor::new(
        SimulatedAnchor::new(100, 100),
        (),
        SimulatedTimer::new(10_000),
        CountingDelay(&slept),
        StoppedClock,
    )
    .with_supervisor_config(SupervisorConfig::fast());

    supervisor.initialize_with_retry();
    assert_eq!(slept.get(), 500);

    supervisor.radio_mut().wedge();

    for _ in 0..10 {
        assert!(supervisor.step().is_err());
    }
    assert_eq!(supervisor.state().reinitializations, 1);
    assert_eq!(supervisor.state().consecutive_failures, 0);

    let measurement = supervisor.step().unwrap();
    assert_eq!(measurement.distance.millimeters(), 469);
    assert_eq!(supervisor.state().cycle_count, 11);
    assert_eq!(supervisor.state().successes, 1);

    // Startup settle, reinit settle, and a full period after each cycle
    assert_eq!(slept.get(), 500 + 100 + 11 * 50);
    assert_eq!(supervisor.radio().last_final().unwrap().distance_mm, 469);
}
