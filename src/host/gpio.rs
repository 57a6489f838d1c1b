//! Charger status pin.
//!
//! Many battery boards expose a CHRG/PGOOD line that is driven while external
//! power is connected. Its polarity varies, so it is configurable.

use rppal::gpio::{Gpio, InputPin, Level};
use thiserror::Error;

/// GPIO-related errors
#[derive(Error, Debug)]
pub enum GpioError {
    #[error("GPIO initialization failed: {0}")]
    InitError(#[from] rppal::gpio::Error),
}

/// Input pin reporting whether external power is present
pub struct ChargerPin {
    pin: InputPin,
    active_low: bool,
}

impl ChargerPin {
    /// Claim the pin (BCM numbering) as an input.
    ///
    /// Active-low lines are usually open-drain, so they get a pull-up; the
    /// idle level then reads as "no power".
    pub fn new(pin: u8, active_low: bool) -> Result<Self, GpioError> {
        let gpio = Gpio::new()?;
        let pin = if active_low {
            gpio.get(pin)?.into_input_pullup()
        } else {
            gpio.get(pin)?.into_input_pulldown()
        };

        tracing::debug!(
            "Charger pin initialized: GPIO {} (active {})",
            pin.pin(),
            if active_low { "low" } else { "high" }
        );

        Ok(Self { pin, active_low })
    }

    /// Current state of the line
    pub fn power_present(&self) -> bool {
        level_means_power(self.pin.read(), self.active_low)
    }
}

fn level_means_power(level: Level, active_low: bool) -> bool {
    (level == Level::High) != active_low
}
