//! Color conversions for Z-Wave Color Switch targets.

use groupcast_core::Command;
use serde_json::{json, Value};

const WARM_KELVIN: f64 = 2700.0;
const COLD_KELVIN: f64 = 6500.0;
const NEUTRAL_KELVIN: f64 = 4000.0;

/// Command attributes that request a color change.
pub const COLOR_ATTRIBUTES: &[&str] = &[
    "rgb_color",
    "rgbw_color",
    "rgbww_color",
    "hs_color",
    "xy_color",
    "color_temp",
    "color_temp_kelvin",
];

pub fn has_color(command: &Command) -> bool {
    COLOR_ATTRIBUTES.iter().any(|key| command.get(key).is_some())
}

/// `targetColor` value for the Color Switch command class.
pub fn target_color(command: &Command) -> Option<Value> {
    if let Some(c) = command.get_f64_list("rgb_color").filter(|c| c.len() == 3) {
        return Some(json!({ "red": channel(c[0]), "green": channel(c[1]), "blue": channel(c[2]) }));
    }
    if let Some(c) = command.get_f64_list("rgbw_color").filter(|c| c.len() == 4) {
        return Some(json!({
            "red": channel(c[0]), "green": channel(c[1]), "blue": channel(c[2]),
            "warmWhite": channel(c[3]),
        }));
    }
    if let Some(c) = command.get_f64_list("rgbww_color").filter(|c| c.len() == 5) {
        return Some(json!({
            "red": channel(c[0]), "green": channel(c[1]), "blue": channel(c[2]),
            "warmWhite": channel(c[3]), "coldWhite": channel(c[4]),
        }));
    }
    if let Some(hs) = command.get_f64_list("hs_color").filter(|c| c.len() == 2) {
        let (r, g, b) = hs_to_rgb(hs[0], hs[1]);
        return Some(json!({ "red": r, "green": g, "blue": b }));
    }
    if let Some(xy) = command.get_f64_list("xy_color").filter(|c| c.len() == 2) {
        let (r, g, b) = xy_to_rgb(xy[0], xy[1]);
        return Some(json!({ "red": r, "green": g, "blue": b }));
    }
    let kelvin = command.get_f64("color_temp_kelvin").or_else(|| {
        command
            .get_f64("color_temp")
            .map(|mireds| if mireds > 0.0 { 1_000_000.0 / mireds } else { NEUTRAL_KELVIN })
    })?;
    let (warm, cold) = white_channels(kelvin);
    Some(json!({ "warmWhite": warm, "coldWhite": cold }))
}

fn channel(v: f64) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

/// Hue in degrees, saturation in percent, at full value.
pub fn hs_to_rgb(hue: f64, saturation: f64) -> (u8, u8, u8) {
    let h = (hue.rem_euclid(360.0)) / 60.0;
    let s = (saturation / 100.0).clamp(0.0, 1.0);
    let sector = h.floor();
    let f = h - sector;
    let p = 1.0 - s;
    let q = 1.0 - s * f;
    let t = 1.0 - s * (1.0 - f);
    let (r, g, b) = match sector as u8 % 6 {
        0 => (1.0, t, p),
        1 => (q, 1.0, p),
        2 => (p, 1.0, t),
        3 => (p, q, 1.0),
        4 => (t, p, 1.0),
        _ => (1.0, p, q),
    };
    ((r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8)
}

/// CIE 1931 chromaticity to sRGB at full luminance, without gamma.
pub fn xy_to_rgb(x: f64, y: f64) -> (u8, u8, u8) {
    let z = 1.0 - x - y;
    let luminance = 1.0;
    let (cx, cz) = if y > 0.0 {
        (luminance / y * x, luminance / y * z)
    } else {
        (0.0, 0.0)
    };

    let r = cx * 3.2406 - luminance * 1.5372 - cz * 0.4986;
    let g = -cx * 0.9689 + luminance * 1.8758 + cz * 0.0415;
    let b = cx * 0.0557 - luminance * 0.2040 + cz * 1.0570;

    let scale = |v: f64| (v.clamp(0.0, 1.0) * 255.0) as u8;
    (scale(r), scale(g), scale(b))
}

/// Split a color temperature into warm and cold white levels.
pub fn white_channels(kelvin: f64) -> (u8, u8) {
    let kelvin = kelvin.clamp(WARM_KELVIN, COLD_KELVIN);
    let ratio = (kelvin - WARM_KELVIN) / (COLD_KELVIN - WARM_KELVIN);
    (((1.0 - ratio) * 255.0) as u8, (ratio * 255.0) as u8)
}
