//! XML manifest describing a frame sequence.
//!
//! ```xml
//! <sequence>
//!     <frames>192</frames>
//!     <pattern>/sequence/{name}_delay-{delay}.webp</pattern>
//!     <playback>
//!         <breakpoint>1024</breakpoint>
//!         <duration>8</duration>
//!         <reclassify>false</reclassify>
//!     </playback>
//!     <overlay>
//!         <curve>0 0.4 0.1</curve>
//!         <peak-at>0.5</peak-at>
//!         <lag>0.5</lag>
//!     </overlay>
//!     <loader>
//!         <max-in-flight>16</max-in-flight>
//!     </loader>
//! </sequence>
//! ```
//!
//! Every element is optional; missing values keep their defaults.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use roxmltree::{Document, Node};

use crate::config::EngineConfig;
use crate::mapper::LightCurve;

impl EngineConfig {
    /// Parses a sequence manifest on top of the defaults.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let document = Document::parse(xml).context("invalid manifest XML")?;
        let root = document.root_element();
        if !root.has_tag_name("sequence") {
            bail!(
                "manifest root must be <sequence>, found <{}>",
                root.tag_name().name()
            );
        }

        let mut config = EngineConfig::default();
        config.frame_count = parse_usize(optional_text(&root, "frames"), config.frame_count)
            .context("invalid <frames>")?;
        if let Some(pattern) = optional_text(&root, "pattern") {
            config.source_pattern = pattern;
        }

        if let Some(playback) = child(&root, "playback") {
            config.compact_breakpoint =
                parse_f64(optional_text(&playback, "breakpoint"), config.compact_breakpoint)
                    .context("invalid <breakpoint>")?;
            config.autoplay_duration = optional_text(&playback, "duration")
                .map(|value| parse_seconds(&value))
                .transpose()
                .context("invalid <duration>")?;
            config.reclassify_on_resize =
                parse_bool(optional_text(&playback, "reclassify"), config.reclassify_on_resize)
                    .context("invalid <reclassify>")?;
        }

        if let Some(overlay) = child(&root, "overlay") {
            config.light_curve = parse_curve(
                optional_text(&overlay, "curve"),
                optional_text(&overlay, "peak-at"),
                config.light_curve,
            )?;
            if let Some(lag) = optional_text(&overlay, "lag") {
                config.overlay_lag = parse_seconds(&lag).context("invalid <lag>")?;
            }
        }

        if let Some(loader) = child(&root, "loader") {
            config.max_in_flight = optional_text(&loader, "max-in-flight")
                .map(|value| parse_usize(Some(value), 0))
                .transpose()
                .context("invalid <max-in-flight>")?
                .filter(|limit| *limit > 0);
        }

        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &EngineConfig) -> Result<()> {
    if config.frame_count == 0 {
        bail!("a sequence needs at least one frame");
    }
    if !(config.compact_breakpoint.is_finite() && config.compact_breakpoint >= 0.0) {
        bail!("breakpoint must be a non-negative number");
    }
    let curve = config.light_curve;
    for (name, value) in [
        ("baseline", curve.baseline),
        ("peak", curve.peak),
        ("rest", curve.rest),
    ] {
        if !(0.0..=1.0).contains(&value) {
            bail!("overlay {name} {value} is outside [0, 1]");
        }
    }
    if !(curve.peak_at > 0.0 && curve.peak_at < 1.0) {
        bail!("overlay peak-at {} must lie strictly between 0 and 1", curve.peak_at);
    }
    Ok(())
}

fn child<'a, 'input>(node: &Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|child| child.has_tag_name(tag))
}

fn optional_text(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    child(node, tag)
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(|text| text.to_string())
}

fn parse_curve(
    values: Option<String>,
    peak_at: Option<String>,
    default: LightCurve,
) -> Result<LightCurve> {
    let mut curve = default;
    if let Some(values) = values {
        let numbers = values
            .split_whitespace()
            .map(|component| component.parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| anyhow!("failed to parse curve: {err}"))?;
        let &[baseline, peak, rest] = numbers.as_slice() else {
            bail!("curve needs three components (baseline peak rest)");
        };
        curve.baseline = baseline;
        curve.peak = peak;
        curve.rest = rest;
    }
    if let Some(peak_at) = peak_at {
        curve.peak_at = peak_at
            .parse::<f32>()
            .map_err(|err| anyhow!("failed to parse peak-at: {err}"))?;
    }
    Ok(curve)
}

fn parse_seconds(value: &str) -> Result<Duration> {
    let seconds = value
        .parse::<f64>()
        .map_err(|err| anyhow!("failed to parse seconds: {err}"))?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|err| anyhow!("invalid duration {seconds}: {err}"))
}

fn parse_f64(value: Option<String>, default: f64) -> Result<f64> {
    match value {
        Some(value) => value
            .parse::<f64>()
            .map_err(|err| anyhow!("failed to parse number: {err}")),
        None => Ok(default),
    }
}

fn parse_usize(value: Option<String>, default: usize) -> Result<usize> {
    match value {
        Some(value) => value
            .parse::<usize>()
            .map_err(|err| anyhow!("failed to parse count: {err}")),
        None => Ok(default),
    }
}

fn parse_bool(value: Option<String>, default: bool) -> Result<bool> {
    match value.as_deref() {
        Some("true" | "1" | "yes") => Ok(true),
        Some("false" | "0" | "no") => Ok(false),
        Some(other) => Err(anyhow!("expected a boolean, found {other:?}")),
        None => Ok(default),
    }
}
