//! Runs the ranging loop on the host against a simulated anchor
//!
//! The anchor sits about 3 m away. Every few cycles a fault is injected, and
//! after the tenth cycle the simulated transceiver wedges until it is reset,
//! which the supervisor does after ten failures in a row.
//!
//! ``` text
//! cargo run --example simulated_tag --features std,sim
//! ```

use std::{thread, time};

use embedded_hal::blocking::delay::DelayMs;
use log::LevelFilter;
use uwb_twr::{
    configs::{RangingConfig, SupervisorConfig},
    sim::{SimulatedAnchor, SimulatedTimer},
    time::DTU_SECONDS,
    Clock,
    Supervisor,
};


struct HostClock(time::Instant);

impl Clock for HostClock {
    fn now_ms(&mut self) -> u64 {
        self.0.elapsed().as_millis() as u64
    }
}

struct HostDelay;

impl DelayMs<u32> for HostDelay {
    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(time::Duration::from_millis(u64::from(ms)));
    }
}


fn main() {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .init();

    // 3 m away, replying after 300 µs
    let time_of_flight = (3.0 / uwb_twr::ranging::SPEED_OF_LIGHT_AIR / DTU_SECONDS) as u64;
    let reply_delay = (300e-6 / DTU_SECONDS) as u64;
    let anchor = SimulatedAnchor::new(time_of_flight, reply_delay);

    let mut supervisor = Supervisor::new(
        anchor,
        (),
        SimulatedTimer::new(1_000),
        HostDelay,
        HostClock(time::Instant::now()),
    )
    .with_ranging_config(RangingConfig::default())
    .with_supervisor_config(SupervisorConfig::fast());

    supervisor.initialize_with_retry();

    for cycle in 1..=40u32 {
        match cycle {
            5 => supervisor.radio_mut().inject_garbage(4),
            7 => supervisor.radio_mut().drop_responses(2),
            10 => supervisor.radio_mut().wedge(),
            _ => (),
        }

        let _ = supervisor.step();
    }

    let state = supervisor.state();
    println!(
        "{} cycles, {} successful, {} re-initializations",
        state.cycle_count, state.successes, state.reinitializations,
    );
}
