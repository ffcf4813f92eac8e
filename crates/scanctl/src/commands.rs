//! CLI command implementations

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;

use scanconf::{ConfigSources, ScanConfig};
use scansession::sim::{ScriptedDecoder, SimCamera};
use scansession::{
    CameraSelector, DecodeError, DecodedResult, DeviceSelector, NullSurface, ScanError,
    ScanObserver, ScanSession, ScanState, VideoInputDevice,
};

/// Flags of the `scan` subcommand.
pub struct ScanOptions {
    pub code: String,
    pub after_frames: usize,
    pub deny_permission: bool,
    pub no_devices: bool,
    pub cancel_after_ms: Option<u64>,
    pub json: bool,
}

/// Logs session callbacks.
struct LogObserver;

impl ScanObserver for LogObserver {
    fn on_match(&self, result: &DecodedResult) {
        tracing::info!(text = %result.text, "Scan matched");
    }

    fn on_error(&self, error: &ScanError) {
        tracing::warn!(kind = %error.kind, "Scan failed: {}", error);
    }

    fn on_diagnostic(&self, error: &DecodeError) {
        tracing::debug!(error = %error, "Frame not decoded");
    }
}

fn sim_camera(no_devices: bool) -> SimCamera {
    if no_devices {
        SimCamera::without_devices()
    } else {
        SimCamera::new()
    }
}

#[derive(Serialize)]
struct DeviceReport {
    devices: Vec<VideoInputDevice>,
    selected: CameraSelector,
}

/// List video inputs and the camera a scan would pick
pub async fn devices(config: &ScanConfig, no_devices: bool, json: bool) -> Result<()> {
    let camera = sim_camera(no_devices);
    let selector = DeviceSelector::from_config(&config.camera);

    let devices = selector.list_devices(&camera).await;
    let selected = selector.resolve(&devices);
    let report = DeviceReport { devices, selected };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.devices.is_empty() {
        println!("No video inputs found");
    }
    for device in &report.devices {
        let label = if device.label.is_empty() {
            "(no label)"
        } else {
            device.label.as_str()
        };
        println!("{:<12} {}", device.device_id, label);
    }
    println!("Selected: {}", report.selected);
    Ok(())
}

#[derive(Serialize)]
struct ScanReport {
    session: String,
    state: ScanState,
    camera: Option<CameraSelector>,
    result: Option<DecodedResult>,
    error: Option<ScanError>,
}

/// Run one scan attempt against the simulated camera
pub async fn scan(config: &ScanConfig, options: ScanOptions) -> Result<()> {
    let camera = Arc::new(sim_camera(options.no_devices));
    camera.set_permission_denied(options.deny_permission);
    let decoder = Arc::new(ScriptedDecoder::code_after(options.after_frames, options.code));

    let session = ScanSession::new(
        config,
        camera.clone(),
        decoder,
        Arc::new(NullSurface),
        Arc::new(LogObserver),
    );

    session.start()?;

    let state = match options.cancel_after_ms {
        Some(ms) => {
            tokio::select! {
                state = session.settled() => state,
                _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                    tracing::info!(after_ms = ms, "Cancelling scan");
                    session.stop();
                    session.settled().await
                }
            }
        }
        None => session.settled().await,
    };

    let report = ScanReport {
        session: session.id().to_string(),
        state,
        camera: session.selected_camera(),
        result: session.result(),
        error: session.last_error(),
    };
    let live = camera.stats().live_streams;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match (&report.result, &report.error) {
            (Some(result), _) => println!("{}", result.text),
            (None, Some(error)) => println!("{}: {}", error.kind, error.message),
            (None, None) => println!("Scan {}", report.state),
        }
    }

    if live != 0 {
        bail!("{} camera stream(s) still live after scan", live);
    }
    if let Some(error) = report.error {
        bail!("Scan ended with {}", error.kind);
    }
    Ok(())
}

/// Print the effective configuration and where it came from
pub fn show_config(config: &ScanConfig, sources: &ConfigSources) {
    if sources.files.is_empty() {
        println!("# No config files found, using defaults");
    }
    for path in &sources.files {
        println!("# Loaded: {}", path.display());
    }
    for var in &sources.env_overrides {
        println!("# Env override: {}", var);
    }
    println!();
    print!("{}", config.to_toml());
}
