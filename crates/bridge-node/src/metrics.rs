#![allow(clippy::unwrap_used)]

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
  let c = IntCounter::new(name, help).unwrap();
  REGISTRY.register(Box::new(c.clone())).ok();
  c
}

fn gauge(name: &str, help: &str) -> IntGauge {
  let g = IntGauge::new(name, help).unwrap();
  REGISTRY.register(Box::new(g.clone())).ok();
  g
}

pub static POLLS_TOTAL: Lazy<IntCounter> =
  Lazy::new(|| counter("blinkbridge_polls_total", "Clip poll ticks across all cameras"));

pub static CLIPS_DOWNLOADED_TOTAL: Lazy<IntCounter> =
  Lazy::new(|| counter("blinkbridge_clips_downloaded_total", "Clips downloaded from the vendor"));

pub static CLIPS_SKIPPED_TOTAL: Lazy<IntCounter> =
  Lazy::new(|| counter("blinkbridge_clips_skipped_total", "Clips that vanished before download"));

pub static TRANSCODES_TOTAL: Lazy<IntCounter> =
  Lazy::new(|| counter("blinkbridge_transcodes_total", "Loop videos prepared successfully"));

pub static TRANSCODE_FAILURES_TOTAL: Lazy<IntCounter> =
  Lazy::new(|| counter("blinkbridge_transcode_failures_total", "Failed loop video preparations"));

pub static RELOGINS_TOTAL: Lazy<IntCounter> =
  Lazy::new(|| counter("blinkbridge_relogins_total", "Vendor session renewals"));

pub static PUBLISHER_CRASHES_TOTAL: Lazy<IntCounter> =
  Lazy::new(|| counter("blinkbridge_publisher_crashes_total", "Unexpected media server exits"));

pub static PUBLISHER_RESTARTS_TOTAL: Lazy<IntCounter> =
  Lazy::new(|| counter("blinkbridge_publisher_restarts_total", "Media server restart attempts"));

pub static PUBLISHER_FAILED: Lazy<IntGauge> =
  Lazy::new(|| gauge("blinkbridge_publisher_failed", "1 when the media server exhausted its restart budget"));

pub static CAMERAS_PUBLISHING: Lazy<IntGauge> =
  Lazy::new(|| gauge("blinkbridge_cameras_publishing", "Stream paths registered with the media server"));

pub fn render() -> String {
  let mut buf = Vec::new();
  let encoder = TextEncoder::new();
  let mfs = REGISTRY.gather();
  encoder.encode(&mfs, &mut buf).ok();
  String::from_utf8(buf).unwrap_or_default()
}
