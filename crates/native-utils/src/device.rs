use anyhow::{Context, Result};
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

/// Finds the input device called `device_name`, or the host default.
pub fn get_or_default_input(device_name: Option<&str>) -> Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());

    let Some(target) = device_name else {
        return host
            .default_input_device()
            .context("no default input device");
    };
    host.input_devices()
        .context("failed to enumerate input devices")?
        .find(|device| device.name().is_ok_and(|name| name == target))
        .with_context(|| format!("no input device named '{}'", target))
}

/// Finds the output device called `device_name`, or the host default.
pub fn get_or_default_output(device_name: Option<&str>) -> Result<Device> {
    let host = get_host();

    let Some(target) = device_name else {
        return host
            .default_output_device()
            .context("no default output device");
    };
    host.output_devices()
        .context("failed to enumerate output devices")?
        .find(|device| device.name().is_ok_and(|name| name == target))
        .with_context(|| format!("no output device named '{}'", target))
}

fn describe(name: &str, channels: u16, sample_rate: u32, default: Option<&str>) -> String {
    let mut line = format!(" * {}({}ch, {}hz)", name, channels, sample_rate);
    if default == Some(name) {
        line.push_str(" [default]");
    }
    line
}

/// One line per input device with its default channel count and rate.
pub fn get_available_inputs() -> Result<String> {
    let host = get_host();
    let default_device = host.default_input_device().and_then(|d| d.name().ok());

    let mut device_names = Vec::new();
    for device in host.input_devices().context("failed to enumerate input devices")? {
        let Ok(name) = device.name() else {
            continue;
        };
        match device.default_input_config() {
            Ok(config) => device_names.push(describe(
                &name,
                config.channels(),
                config.sample_rate().0,
                default_device.as_deref(),
            )),
            Err(e) => tracing::debug!("skipping input '{}': {}", name, e),
        }
    }
    Ok(device_names.join("\n"))
}

/// One line per output device with its default channel count and rate.
pub fn get_available_outputs() -> Result<String> {
    let host = get_host();
    let default_device = host.default_output_device().and_then(|d| d.name().ok());

    let mut device_names = Vec::new();
    for device in host.output_devices().context("failed to enumerate output devices")? {
        let Ok(name) = device.name() else {
            continue;
        };
        match device.default_output_config() {
            Ok(config) => device_names.push(describe(
                &name,
                config.channels(),
                config.sample_rate().0,
                default_device.as_deref(),
            )),
            Err(e) => tracing::debug!("skipping output '{}': {}", name, e),
        }
    }
    Ok(device_names.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_device_is_marked() {
        assert_eq!(
            describe("Built-in Microphone", 1, 48_000, Some("Built-in Microphone")),
            " * Built-in Microphone(1ch, 48000hz) [default]"
        );
        assert_eq!(
            describe("USB Headset", 2, 44_100, Some("Built-in Microphone")),
            " * USB Headset(2ch, 44100hz)"
        );
    }
}
