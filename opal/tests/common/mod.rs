//! Shared scaffolding for device-bound tests.
use opal::{init, Device};

/// A headless device, or `None` (with a message) when no vulkan driver is
/// installed on the machine running the tests.
pub fn test_device() -> Option<Device> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let (entry, instance) = match unsafe { init::create_instance("opal-tests", &[]) } {
        Ok(pair) => pair,
        Err(err) => {
            eprintln!("skipping device-bound test: vulkan unavailable ({err})");
            return None;
        }
    };
    match unsafe { init::create_device(&entry, &instance, None) } {
        Ok(device) => Some(device),
        Err(err) => {
            eprintln!("skipping device-bound test: no usable device ({err})");
            None
        }
    }
}
