//! Task watchdog (TWDT) user registration for the link task.
//!
//! A stalled BLE stack or a wedged I2C bus shows up as a missed feed and
//! resets the chip.

use esp_idf_svc::sys::{
    esp_task_wdt_add_user, esp_task_wdt_delete_user, esp_task_wdt_reset_user,
    esp_task_wdt_user_handle_t, EspError,
};
use log::{debug, error};
use std::ffi::CStr;

/// A registered watchdog user. Unregisters on drop.
pub struct WatchdogHandle {
    handle: esp_task_wdt_user_handle_t,
    name: &'static CStr,
}

impl WatchdogHandle {
    /// Register a watchdog user, e.g. `c"obd_link"`.
    pub fn register(name: &'static CStr) -> Result<Self, EspError> {
        let mut handle: esp_task_wdt_user_handle_t = std::ptr::null_mut();
        // SAFETY: name is a static NUL-terminated string, handle is a valid out pointer
        EspError::convert(unsafe { esp_task_wdt_add_user(name.as_ptr(), &mut handle) })?;
        debug!("Watchdog: registered user {name:?}");
        Ok(Self { handle, name })
    }

    /// Must be called within the TWDT timeout
    pub fn feed(&self) {
        // SAFETY: handle came from a successful esp_task_wdt_add_user
        let result = unsafe { esp_task_wdt_reset_user(self.handle) };
        if result != 0 {
            error!("Watchdog: failed to feed {:?}: error code {result}", self.name);
        }
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        debug!("Watchdog: unregistering user {:?}", self.name);
        // SAFETY: handle came from a successful esp_task_wdt_add_user
        let result = unsafe { esp_task_wdt_delete_user(self.handle) };
        if result != 0 {
            error!("Watchdog: failed to unregister {:?}: error code {result}", self.name);
        }
    }
}
