use serde::{Deserialize, Serialize};

pub const DEFAULT_SPLIT_PERCENT: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DragState {
    Idle,
    Dragging,
}

/// Horizontal extent of the comparison area in client coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareBounds {
    pub left: f64,
    pub width: f64,
}

impl CompareBounds {
    pub fn new(left: f64, width: f64) -> Self {
        Self { left, width }
    }

    /// Split percentage for a pointer at `client_x`, or `None` while the area
    /// has no width (not laid out yet).
    pub fn percent_at(&self, client_x: f64) -> Option<f64> {
        if self.width.is_nan() || self.width <= 0.0 {
            return None;
        }
        let x = (client_x - self.left).clamp(0.0, self.width);
        Some(x / self.width * 100.0)
    }
}

/// Clip insets, in percent of the area width, for the "after" image.
///
/// The split value reads as "how much of the result is shown": 0 is all
/// before and 100 is all after. That fixes the after image to `[0, split]`
/// (inset right by `100 - split`), with "before" showing through on the
/// right of the handle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AfterClip {
    pub left: f64,
    pub right: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareController {
    state: DragState,
    percent: f64,
    bounds: Option<CompareBounds>,
}

impl Default for CompareController {
    fn default() -> Self {
        Self {
            state: DragState::Idle,
            percent: DEFAULT_SPLIT_PERCENT,
            bounds: None,
        }
    }
}

impl CompareController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DragState {
        self.state
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }

    pub fn bounds(&self) -> Option<CompareBounds> {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: CompareBounds) {
        self.bounds = Some(bounds);
    }

    pub fn set_percent(&mut self, percent: f64) {
        if percent.is_nan() {
            return;
        }
        self.percent = percent.clamp(0.0, 100.0);
    }

    /// Back to the default split. Drag state is left alone, a release still
    /// arrives through [`CompareController::pointer_up`].
    pub fn reset(&mut self) {
        self.percent = DEFAULT_SPLIT_PERCENT;
    }

    /// Pointer or touch pressed on the slider handle.
    pub fn pointer_down(&mut self, client_x: f64) {
        self.state = DragState::Dragging;
        self.track(client_x);
    }

    /// Pointer or touch moved anywhere; only tracked while dragging.
    pub fn pointer_move(&mut self, client_x: f64) {
        if self.state == DragState::Dragging {
            self.track(client_x);
        }
    }

    /// Pointer or touch released anywhere.
    pub fn pointer_up(&mut self) {
        self.state = DragState::Idle;
    }

    /// Click or tap inside the comparison area; jumps without dragging.
    pub fn click(&mut self, client_x: f64) {
        self.track(client_x);
    }

    pub fn after_clip(&self) -> AfterClip {
        AfterClip {
            left: 0.0,
            right: 100.0 - self.percent,
        }
    }

    fn track(&mut self, client_x: f64) {
        if let Some(percent) = self.bounds.and_then(|bounds| bounds.percent_at(client_x)) {
            self.set_percent(percent);
        }
    }
}
