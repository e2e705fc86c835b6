//! Geometry helpers: resolution negotiation, overlay scaling and tap-to-focus.

use crate::error::CaptureError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Half the side of the square drawn and focused around a tap, in display pixels.
const FOCUS_HALF_EXTENT: i32 = 100;
/// Camera focus areas live in a fixed [-1000, 1000] coordinate space.
const FOCUS_SPACE: i32 = 1000;
const FOCUS_WEIGHT: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
        let width = w.trim().parse().map_err(|_| format!("invalid width '{w}'"))?;
        let height = h.trim().parse().map_err(|_| format!("invalid height '{h}'"))?;
        Ok(Self::new(width, height))
    }
}

/// Picks the largest supported resolution by area; the first one listed wins
/// ties. Falls back to the first option when every option is degenerate.
pub fn best_resolution(supported: &[Resolution]) -> Result<Resolution, CaptureError> {
    let first = *supported.first().ok_or(CaptureError::NoResolutions)?;
    let best = supported
        .iter()
        .copied()
        .fold(None::<Resolution>, |best, candidate| match best {
            Some(b) if b.area() >= candidate.area() => Some(b),
            _ if candidate.area() > 0 => Some(candidate),
            _ => best,
        });
    Ok(best.unwrap_or(first))
}

/// A detected word box in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TextRegion {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl TextRegion {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }
}

impl From<(i32, i32, i32, i32)> for TextRegion {
    fn from((left, top, right, bottom): (i32, i32, i32, i32)) -> Self {
        Self::new(left, top, right, bottom)
    }
}

/// A region mapped onto the display surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplayRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

/// How frames must be turned before recognition, given how the sensor is mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    /// Frames are already upright.
    None,
    /// Landscape-mounted sensor read in portrait.
    #[default]
    Clockwise90,
}

impl Rotation {
    /// Dimensions of a `capture`-sized frame after rotation.
    pub fn apply(self, capture: Resolution) -> Resolution {
        match self {
            Rotation::None => capture,
            Rotation::Clockwise90 => Resolution::new(capture.height, capture.width),
        }
    }
}

/// Ratios from recognized-image pixels to display pixels.
///
/// With a 90 degree turn the capture height runs along the display width and
/// vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplayScale {
    pub horizontal: f32,
    pub vertical: f32,
}

impl Default for DisplayScale {
    fn default() -> Self {
        Self { horizontal: 1.0, vertical: 1.0 }
    }
}

impl DisplayScale {
    pub fn new(display: Resolution, capture: Resolution, rotation: Rotation) -> Self {
        if capture.area() == 0 {
            return Self::default();
        }
        let source = rotation.apply(capture);
        Self {
            horizontal: display.width as f32 / source.width as f32,
            vertical: display.height as f32 / source.height as f32,
        }
    }

    pub fn apply(&self, region: &TextRegion) -> DisplayRect {
        DisplayRect {
            left: region.left as f32 * self.horizontal,
            top: region.top as f32 * self.vertical,
            right: region.right as f32 * self.horizontal,
            bottom: region.bottom as f32 * self.vertical,
        }
    }
}

/// Focus request produced by a tap on the preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FocusArea {
    /// Square drawn on the display around the tap.
    pub indicator: TextRegion,
    /// The same square in camera focus coordinates.
    pub area: TextRegion,
    pub weight: u32,
}

/// Maps a tap at display point (`x`, `y`) on a `view`-sized surface to a focus
/// area. Taps outside the surface are pulled onto its edge.
pub fn focus_for_tap(x: f32, y: f32, view: Resolution) -> Option<FocusArea> {
    if view.area() == 0 {
        return None;
    }
    let (w, h) = (i64::from(view.width), i64::from(view.height));
    let x = (x.clamp(0.0, view.width as f32) as i64).min(w);
    let y = (y.clamp(0.0, view.height as f32) as i64).min(h);
    let half = i64::from(FOCUS_HALF_EXTENT);
    let space = i64::from(FOCUS_SPACE);
    let to_display = |v: i64| v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
    let to_focus = |v: i64, extent: i64| (v * 2 * space / extent - space).clamp(-space, space) as i32;

    let (left, top, right, bottom) = (x - half, y - half, x + half, y + half);
    Some(FocusArea {
        indicator: TextRegion::new(to_display(left), to_display(top), to_display(right), to_display(bottom)),
        area: TextRegion::new(to_focus(left, w), to_focus(top, h), to_focus(right, w), to_focus(bottom, h)),
        weight: FOCUS_WEIGHT,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_largest_resolution_by_area() {
        let supported = [
            Resolution::new(320, 240),
            Resolution::new(640, 480),
            Resolution::new(1280, 720),
        ];
        assert_eq!(best_resolution(&supported).unwrap(), Resolution::new(1280, 720));

        let unordered = [
            Resolution::new(1280, 720),
            Resolution::new(176, 144),
            Resolution::new(1920, 1080),
            Resolution::new(640, 480),
        ];
        assert_eq!(best_resolution(&unordered).unwrap(), Resolution::new(1920, 1080));
    }

    #[test]
    fn first_listed_wins_ties_and_degenerate_lists() {
        let tied = [Resolution::new(800, 600), Resolution::new(600, 800)];
        assert_eq!(best_resolution(&tied).unwrap(), Resolution::new(800, 600));

        let degenerate = [Resolution::new(0, 480), Resolution::new(640, 0)];
        assert_eq!(best_resolution(&degenerate).unwrap(), Resolution::new(0, 480));

        assert!(matches!(best_resolution(&[]), Err(CaptureError::NoResolutions)));
    }

    #[test]
    fn parses_resolution_strings() {
        assert_eq!("1080x1920".parse::<Resolution>().unwrap(), Resolution::new(1080, 1920));
        assert_eq!("640X480".parse::<Resolution>().unwrap(), Resolution::new(640, 480));
        assert!("640".parse::<Resolution>().is_err());
        assert!("ax480".parse::<Resolution>().is_err());
    }

    #[test]
    fn scales_rotated_regions_onto_display() {
        let portrait = Resolution::new(720, 1280);
        let scale = DisplayScale::new(portrait, Resolution::new(1280, 720), Rotation::Clockwise90);
        assert_eq!(scale, DisplayScale { horizontal: 1.0, vertical: 1.0 });

        let scale = DisplayScale::new(Resolution::new(360, 1280), Resolution::new(640, 480), Rotation::Clockwise90);
        let rect = scale.apply(&TextRegion::new(10, 20, 30, 40));
        assert_eq!(rect, DisplayRect { left: 7.5, top: 40.0, right: 22.5, bottom: 80.0 });

        let upright = DisplayScale::new(Resolution::new(320, 960), Resolution::new(640, 480), Rotation::None);
        assert_eq!(upright, DisplayScale { horizontal: 0.5, vertical: 2.0 });

        let degenerate = DisplayScale::new(Resolution::new(10, 10), Resolution::new(0, 0), Rotation::None);
        assert_eq!(degenerate, DisplayScale::default());
    }

    #[test]
    fn tap_maps_into_focus_space() {
        let focus = focus_for_tap(500.0, 500.0, Resolution::new(1000, 1000)).unwrap();
        assert_eq!(focus.indicator, TextRegion::new(400, 400, 600, 600));
        assert_eq!(focus.area, TextRegion::new(-200, -200, 200, 200));
        assert_eq!(focus.weight, 1000);

        let corner = focus_for_tap(0.0, 0.0, Resolution::new(1000, 1000)).unwrap();
        assert_eq!(corner.area, TextRegion::new(-1000, -1000, -800, -800));

        assert!(focus_for_tap(1.0, 1.0, Resolution::new(0, 0)).is_none());
    }

    #[test]
    fn far_off_taps_land_on_the_edge() {
        let view = Resolution::new(640, 480);
        let far = focus_for_tap(2_000_000.0, 10.0, view).unwrap();
        assert_eq!(far, focus_for_tap(640.0, 10.0, view).unwrap());
        assert_eq!(far.indicator.left, 540);
        assert_eq!(far.area.right, 1000);

        let below = focus_for_tap(-5e9, f32::MAX, view).unwrap();
        assert_eq!(below.indicator, TextRegion::new(-100, 380, 100, 580));
        assert_eq!(below.area.left, -1000);
        assert_eq!(below.area.bottom, 1000);
    }
}
