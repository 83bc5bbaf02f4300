//! XIAO ESP32S3 Sense pins: wake button on D0 (GPIO1, RTC-capable, active
//! low) and the user LED on GPIO21 (active low).

use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull, RtcPinWithResistors};
use esp_hal::peripherals::{GPIO1, GPIO21};
use esp_hal::rtc_cntl::Rtc;
use esp_hal::rtc_cntl::sleep::{Ext0WakeupSource, WakeupLevel};
use esp_hal::system::SleepSource;
use log::info;
use wakecam::{Board, WakeCause};

pub struct EspBoard<'d> {
    button: Input<'d>,
    led: Output<'d>,
}

impl EspBoard<'static> {
    pub fn new(button: GPIO1<'static>, led: GPIO21<'static>) -> Self {
        Self {
            button: Input::new(button, InputConfig::default().with_pull(Pull::Up)),
            led: Output::new(led, Level::High, OutputConfig::default()),
        }
    }

    /// Arm the wake button as ext0 source and power down. Wakes as a fresh boot.
    pub fn enter_deep_sleep(self, rtc: &mut Rtc<'static>) -> ! {
        info!("[SLEEP] entering deep sleep, wake button armed");
        drop(self);

        // The Input is gone; the RTC domain owns the pin from here.
        let button = unsafe { GPIO1::steal() };
        button.rtcio_pullup(true);
        button.rtcio_pulldown(false);
        let ext0 = Ext0WakeupSource::new(button, WakeupLevel::Low);

        rtc.sleep_deep(&[&ext0])
    }
}

impl Board for EspBoard<'_> {
    fn configure(&mut self) {
        self.button
            .apply_config(&InputConfig::default().with_pull(Pull::Up));
        self.led.apply_config(&OutputConfig::default().with_pull(Pull::None));
        self.led.set_high();
    }

    fn set_status_led(&mut self, on: bool) {
        self.led.set_level(if on { Level::Low } else { Level::High });
    }

    fn wake_cause(&self) -> WakeCause {
        match esp_hal::rtc_cntl::wakeup_cause() {
            SleepSource::Ext0 => WakeCause::ExternalPin,
            other => WakeCause::Other(other as u8),
        }
    }
}
