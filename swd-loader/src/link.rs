//! Bit-level SWD link.
//!
//! Drives the two signal lines directly: SWCLK carries the clock, SWDIO
//! carries data in both directions. The data line changes ownership at
//! protocol turnaround points; between exchanges the host parks it at the
//! configured idle level.
//!
//! Physical pin access sits behind [`LinkPins`], implemented once per host
//! platform. Everything above this module is platform independent.

use std::time::Duration;

/// Physical access to the two SWD signal lines.
///
/// Implementations only set and read pin levels; all protocol timing is
/// driven by [`BitbangLink`].
pub trait LinkPins {
    /// Drive SWCLK to the given level.
    fn set_clock(&mut self, high: bool);

    /// Drive SWDIO to the given level. Only called while the host owns the
    /// line.
    fn set_data(&mut self, high: bool);

    /// Sample the current SWDIO level.
    fn read_data(&mut self) -> bool;

    /// Switch SWDIO between host-driven (`true`) and released (`false`).
    ///
    /// While released the target may drive the line; the host must not.
    fn set_data_driven(&mut self, driven: bool);

    /// Wait half a clock period.
    ///
    /// The default is fine for relaxed clock rates. Platforms that need a
    /// fast or precise clock should busy-wait instead.
    fn delay(&mut self, half_period: Duration) {
        std::thread::sleep(half_period);
    }
}

/// Static configuration of the physical link. Immutable once a session runs.
///
/// The pin numbers are for the platform's [`LinkPins`] implementation; the
/// link itself never interprets them.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Host pin wired to the target's SWCLK.
    pub swclk_pin: u8,
    /// Host pin wired to the target's SWDIO.
    pub swdio_pin: u8,
    /// Duration of one full SWCLK cycle.
    pub clock_period: Duration,
    /// Level the host parks SWDIO at while no exchange is in progress.
    pub idle_high: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            swdio_pin: 2,
            swclk_pin: 3,
            clock_period: Duration::from_micros(2),
            idle_high: false,
        }
    }
}

/// Bit-transfer contract the protocol layers are written against.
///
/// [`BitbangLink`] implements it on real pins; the test suite substitutes a
/// simulated target. There are no errors at this level: an electrical
/// failure cannot be told apart from reading logic 0, so nothing is retried
/// here.
pub trait SwdIo {
    /// Clock out bits with the host driving SWDIO, least significant first.
    fn write_bits(&mut self, bits: &[bool]);

    /// Release SWDIO and sample `count` bits on successive clock cycles.
    fn read_bits(&mut self, count: usize) -> Vec<bool>;

    /// One clock cycle with SWDIO released, so the drive direction can
    /// change safely. Required at every write-to-read and read-to-write
    /// transition.
    fn turnaround(&mut self);

    /// Clock `cycles` idle cycles with SWDIO driven low.
    fn idle(&mut self, cycles: usize) {
        self.write_bits(&vec![false; cycles]);
    }
}

impl<T: SwdIo + ?Sized> SwdIo for &mut T {
    fn write_bits(&mut self, bits: &[bool]) {
        (**self).write_bits(bits)
    }

    fn read_bits(&mut self, count: usize) -> Vec<bool> {
        (**self).read_bits(count)
    }

    fn turnaround(&mut self) {
        (**self).turnaround()
    }

    fn idle(&mut self, cycles: usize) {
        (**self).idle(cycles)
    }
}

/// The bit-banged SWD link.
///
/// Exclusively owns the two pins for the lifetime of a load operation.
pub struct BitbangLink<P: LinkPins> {
    pins: P,
    config: LinkConfig,
    /// Whether the host currently drives SWDIO.
    output: bool,
}

impl<P: LinkPins> BitbangLink<P> {
    pub fn new(mut pins: P, config: LinkConfig) -> Self {
        pins.set_clock(false);
        pins.set_data(config.idle_high);
        pins.set_data_driven(true);
        Self {
            pins,
            config,
            output: true,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Hand the pins back, e.g. to reuse them after the session.
    pub fn release(self) -> P {
        self.pins
    }

    fn half_period(&self) -> Duration {
        self.config.clock_period / 2
    }

    fn set_output(&mut self, output: bool) {
        if self.output != output {
            self.pins.set_data_driven(output);
            self.output = output;
        }
    }

    /// One full clock cycle driving `bit`. The target samples SWDIO on the
    /// rising edge, so the level is set up while SWCLK is low.
    fn write_bit(&mut self, bit: bool) {
        let half = self.half_period();
        self.pins.set_clock(false);
        self.pins.set_data(bit);
        self.pins.delay(half);
        self.pins.set_clock(true);
        self.pins.delay(half);
    }

    /// One full clock cycle sampling SWDIO. The target presents its bit
    /// while SWCLK is low, so the sample is taken before the rising edge.
    fn read_bit(&mut self) -> bool {
        let half = self.half_period();
        self.pins.set_clock(false);
        self.pins.delay(half);
        let bit = self.pins.read_data();
        self.pins.set_clock(true);
        self.pins.delay(half);
        bit
    }
}

impl<P: LinkPins> std::fmt::Debug for BitbangLink<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitbangLink")
            .field("config", &self.config)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

impl<P: LinkPins> SwdIo for BitbangLink<P> {
    fn write_bits(&mut self, bits: &[bool]) {
        self.set_output(true);
        for &bit in bits {
            self.write_bit(bit);
        }
    }

    fn read_bits(&mut self, count: usize) -> Vec<bool> {
        self.set_output(false);
        (0..count).map(|_| self.read_bit()).collect()
    }

    fn turnaround(&mut self) {
        self.set_output(false);
        self.read_bit();
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::{BitbangLink, LinkConfig, LinkPins, SwdIo};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum PinOp {
        Clock(bool),
        Data(bool),
        Driven(bool),
    }

    #[derive(Default)]
    struct RecordingPins {
        ops: Vec<PinOp>,
        input: Vec<bool>,
        reads: usize,
    }

    impl LinkPins for RecordingPins {
        fn set_clock(&mut self, high: bool) {
            self.ops.push(PinOp::Clock(high));
        }

        fn set_data(&mut self, high: bool) {
            self.ops.push(PinOp::Data(high));
        }

        fn read_data(&mut self) -> bool {
            let level = self.input.get(self.reads).copied().unwrap_or(false);
            self.reads += 1;
            level
        }

        fn set_data_driven(&mut self, driven: bool) {
            self.ops.push(PinOp::Driven(driven));
        }

        fn delay(&mut self, _half_period: Duration) {}
    }

    fn link() -> BitbangLink<RecordingPins> {
        BitbangLink::new(RecordingPins::default(), LinkConfig::default())
    }

    /// Pin operations after the initialization preamble.
    fn ops_after_init(link: BitbangLink<RecordingPins>) -> Vec<PinOp> {
        link.release().ops[3..].to_vec()
    }

    #[test]
    fn write_sets_data_before_the_rising_edge() {
        let mut link = link();
        link.write_bits(&[true, false]);

        assert_eq!(
            ops_after_init(link),
            vec![
                PinOp::Clock(false),
                PinOp::Data(true),
                PinOp::Clock(true),
                PinOp::Clock(false),
                PinOp::Data(false),
                PinOp::Clock(true),
            ]
        );
    }

    #[test]
    fn read_releases_the_line_once_and_clocks_per_bit() {
        let mut link = link();
        link.read_bits(3);

        let ops = ops_after_init(link);
        let released = ops.iter().filter(|op| **op == PinOp::Driven(false)).count();
        let rising_edges = ops.iter().filter(|op| **op == PinOp::Clock(true)).count();
        assert_eq!(released, 1);
        assert_eq!(rising_edges, 3);
    }

    #[test]
    fn read_samples_the_scripted_levels_in_order() {
        let mut pins = RecordingPins::default();
        pins.input = vec![true, false, true];
        let mut link = BitbangLink::new(pins, LinkConfig::default());

        assert_eq!(link.read_bits(3), vec![true, false, true]);
    }

    #[test]
    fn turnaround_releases_and_clocks_one_cycle() {
        let mut link = link();
        link.turnaround();

        assert_eq!(
            ops_after_init(link),
            vec![PinOp::Driven(false), PinOp::Clock(false), PinOp::Clock(true)]
        );
    }

    #[test]
    fn write_after_read_redrives_the_line() {
        let mut link = link();
        link.read_bits(1);
        link.write_bits(&[true]);

        let ops = ops_after_init(link);
        let driven: Vec<_> = ops
            .iter()
            .filter(|op| matches!(op, PinOp::Driven(_)))
            .collect();
        assert_eq!(driven, vec![&PinOp::Driven(false), &PinOp::Driven(true)]);
    }

    #[test]
    fn idle_drives_the_line_low() {
        let mut link = link();
        link.idle(3);

        let ops = ops_after_init(link);
        let low_bits = ops.iter().filter(|op| **op == PinOp::Data(false)).count();
        assert_eq!(low_bits, 3);
        assert!(!ops.contains(&PinOp::Data(true)));
    }
}
