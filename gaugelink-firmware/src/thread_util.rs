//! Named, core-pinned FreeRTOS tasks
//!
//! `std::thread::Builder::name()` only renames the pthread after the
//! FreeRTOS task already exists, so the name, core and stack size are set
//! through `ThreadSpawnConfiguration` before spawning instead.

use esp_idf_hal::cpu::Core;
use esp_idf_hal::task::thread::ThreadSpawnConfiguration;
use esp_idf_svc::sys::EspError;
use std::ffi::CStr;
use std::thread::JoinHandle;

/// Spawn `f` as a FreeRTOS task called `name` (max 15 characters), pinned
/// to `core`.
///
/// The previous spawn configuration is restored afterwards so later
/// `std::thread::spawn` calls are unaffected.
pub fn spawn_pinned<F, T>(
    name: &'static CStr,
    core: Core,
    stack_size: usize,
    f: F,
) -> Result<JoinHandle<T>, EspError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let prev_conf = ThreadSpawnConfiguration::get();

    ThreadSpawnConfiguration {
        name: Some(name.to_bytes_with_nul()),
        pin_to_core: Some(core),
        stack_size,
        ..Default::default()
    }
    .set()?;

    let handle = std::thread::spawn(f);

    prev_conf.unwrap_or_default().set()?;

    Ok(handle)
}
