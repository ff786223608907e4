use anyhow::Result;
use esp_idf_hal::cpu::Core;
use esp_idf_hal::delay::{Delay, FreeRtos};
use esp_idf_hal::gpio::AnyIOPin;
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::prelude::*;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use gaugelink_core::LinkController;
use log::{info, warn};

mod ble;
mod config;
mod lcd;
mod thread_util;
mod watchdog;

use ble::NimbleLink;
use config::Config;
use lcd::Lcd;
use watchdog::WatchdogHandle;

/// NimBLE futures and the session's frame buffers live on this stack
const LINK_TASK_STACK: usize = 16 * 1024;

fn main() -> Result<()> {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("Starting GaugeLink firmware {}...", env!("GIT_VERSION"));

    let peripherals = Peripherals::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    config::init_nvs(nvs)?;
    let config = Config::load_or_default();

    let level = config.log_level.as_level_filter();
    if let Err(e) = esp_idf_svc::log::set_target_level("*", level) {
        warn!("Failed to set log level: {e}");
    } else {
        info!("Log level set to {:?}", config.log_level);
    }

    info!(
        "Initializing LCD at {:#04x} (SDA {}, SCL {})...",
        config.lcd.i2c_address, config.lcd.sda_gpio, config.lcd.scl_gpio
    );
    // SAFETY: We trust the user-configured GPIO pin numbers are valid for this board
    let sda = unsafe { AnyIOPin::new(i32::from(config.lcd.sda_gpio)) };
    let scl = unsafe { AnyIOPin::new(i32::from(config.lcd.scl_gpio)) };
    let i2c_config = I2cConfig::new().baudrate(Hertz(config.lcd.baudrate_hz));
    let i2c = I2cDriver::new(peripherals.i2c0, sda, scl, &i2c_config)?;
    let mut lcd = Lcd::new(i2c, Delay::new_default(), config.lcd.i2c_address);
    if let Err(e) = lcd.init() {
        // Keep going: the link still runs and the logs still show readings
        warn!("LCD init failed: {e:?}");
    }

    ble::init_device(&config.ble.device_name)?;

    let link_config = config.link_config();
    thread_util::spawn_pinned(c"obd_link", Core::Core1, LINK_TASK_STACK, move || {
        let watchdog = WatchdogHandle::register(c"obd_link")
            .map_err(|e| warn!("Link task runs without watchdog: {e}"))
            .ok();

        let mut controller = LinkController::new(NimbleLink::new(), lcd, link_config);
        controller.boot();
        controller.run(|_| {
            if let Some(watchdog) = &watchdog {
                watchdog.feed();
            }
        })
    })?;
    info!("OBD2 link task started");

    // Main loop - keep alive
    loop {
        FreeRtos::delay_ms(1000);
    }
}
