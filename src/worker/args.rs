//! Worker command-line construction
//!
//! The worker reads its arguments positionally in groups, so the order
//! produced here is part of the wire contract: mode group, gamma, brightness.

use crate::models::{ConfigurationSnapshot, TimingMode};

/// Arguments for an enabling invocation of the worker
pub fn build_args(config: &ConfigurationSnapshot) -> Vec<String> {
    let mut args = Vec::with_capacity(10);

    match config.timing_mode() {
        TimingMode::ManualWindow => {
            args.push("-O".to_string());
            args.push(config.night_temperature.to_string());
        }
        TimingMode::Astronomical => {
            args.push("-l".to_string());
            args.push(format!(
                "{}:{}",
                config.latitude.trim(),
                config.longitude.trim()
            ));
            args.push("-t".to_string());
            args.push(format!(
                "{}:{}",
                config.day_temperature, config.night_temperature
            ));
        }
    }
    args.push("-m".to_string());
    args.push(config.render_method.clone());

    if let Some(gamma) = config.gamma.as_deref() {
        if !gamma.trim().is_empty() {
            args.push("-g".to_string());
            args.push(gamma.to_string());
        }
    }

    if let Some(brightness) = brightness_arg(config) {
        args.push("-b".to_string());
        args.push(brightness);
    }

    args
}

/// Arguments for the one-shot reset-to-neutral invocation
pub fn reset_args() -> Vec<String> {
    vec!["-x".to_string()]
}

fn brightness_arg(config: &ConfigurationSnapshot) -> Option<String> {
    let raw = config.brightness.as_deref()?.trim();
    if raw.is_empty() {
        return None;
    }

    match (config.timing_mode(), raw.split_once(':')) {
        // One fixed target in manual mode: keep the night component
        (TimingMode::ManualWindow, Some((_, night))) => {
            let night = night.trim();
            (!night.is_empty()).then(|| night.to_string())
        }
        _ => Some(raw.to_string()),
    }
}
