//! Peripheral init and status signalling
//!
//! The board owns the wake button, the status LED and the wake-source
//! registers. Sleep mode resets pin configuration, so [`Board::configure`]
//! runs at the start of every boot, cold or not.

use embedded_hal_async::delay::DelayNs;

/// Why the chip is running this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    /// The wake button pulled the ext0 pin low during deep sleep.
    ExternalPin,
    /// Cold boot, reset, or any other wakeup source. Carries the raw
    /// platform code for the log line.
    Other(u8),
}

impl WakeCause {
    pub fn is_external_pin(self) -> bool {
        matches!(self, WakeCause::ExternalPin)
    }
}

/// Pin and wake-source control.
pub trait Board {
    /// Wake button: input with pull-up. Status LED: output, no pulls, off.
    /// Idempotent. The low-level wake source on the button pin is armed
    /// at deep-sleep entry, not here.
    fn configure(&mut self);

    fn set_status_led(&mut self, on: bool);

    fn wake_cause(&self) -> WakeCause;
}

impl<T: Board + ?Sized> Board for &mut T {
    fn configure(&mut self) {
        (**self).configure()
    }

    fn set_status_led(&mut self, on: bool) {
        (**self).set_status_led(on)
    }

    fn wake_cause(&self) -> WakeCause {
        (**self).wake_cause()
    }
}

/// LED pulse patterns. There is no success/failure distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    /// One 100 ms pulse.
    Boot,
    /// Two 100 ms pulses 100 ms apart.
    Shutdown,
}

const PULSE_MS: u32 = 100;

impl LedPattern {
    fn pulses(self) -> u8 {
        match self {
            LedPattern::Boot => 1,
            LedPattern::Shutdown => 2,
        }
    }
}

/// Play `pattern` on the status LED. Leaves the LED off.
pub async fn signal<B: Board, D: DelayNs>(board: &mut B, delay: &mut D, pattern: LedPattern) {
    for pulse in 0..pattern.pulses() {
        if pulse > 0 {
            delay.delay_ms(PULSE_MS).await;
        }
        board.set_status_led(true);
        delay.delay_ms(PULSE_MS).await;
        board.set_status_led(false);
    }
}
