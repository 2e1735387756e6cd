use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PanelError {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    #[error("operation {op} has no parameter named {name}")]
    UnknownParameter { op: OperationId, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationId {
    Denoise,
    Bilateral,
    Clahe,
    Unsharp,
    Sharpen,
    Brightness,
}

/// Numeric parameter declared by an operation. `name` is the form field sent
/// to the service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub default: f64,
}

impl ParamSpec {
    const fn new(
        name: &'static str,
        label: &'static str,
        min: f64,
        max: f64,
        step: f64,
        default: f64,
    ) -> Self {
        Self {
            name,
            label,
            min,
            max,
            step,
            default,
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.default;
        }
        value.clamp(self.min, self.max)
    }
}

const DENOISE: &[ParamSpec] = &[ParamSpec::new("h", "NLMeans strength (h)", 1.0, 20.0, 1.0, 10.0)];
const BILATERAL: &[ParamSpec] = &[
    ParamSpec::new("sigmaColor", "Sigma Color", 10.0, 200.0, 5.0, 75.0),
    ParamSpec::new("sigmaSpace", "Sigma Space", 5.0, 50.0, 1.0, 25.0),
];
const CLAHE: &[ParamSpec] = &[ParamSpec::new("clahe", "CLAHE clipLimit", 1.0, 5.0, 0.1, 2.0)];
const UNSHARP: &[ParamSpec] = &[
    ParamSpec::new("sharp", "Unsharp amount", 0.5, 3.0, 0.1, 1.5),
    ParamSpec::new("radius", "Unsharp radius", 0.5, 5.0, 0.1, 1.5),
];
const SHARPEN: &[ParamSpec] = &[ParamSpec::new("sharp", "Sharpen strength", 0.5, 3.0, 0.1, 1.0)];
const BRIGHTNESS: &[ParamSpec] = &[
    ParamSpec::new("brightness", "Brightness", -50.0, 50.0, 1.0, 0.0),
    ParamSpec::new("contrast", "Contrast", 0.5, 2.0, 0.1, 1.0),
];

impl OperationId {
    pub const ALL: [OperationId; 6] = [
        OperationId::Denoise,
        OperationId::Bilateral,
        OperationId::Clahe,
        OperationId::Unsharp,
        OperationId::Sharpen,
        OperationId::Brightness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationId::Denoise => "denoise",
            OperationId::Bilateral => "bilateral",
            OperationId::Clahe => "clahe",
            OperationId::Unsharp => "unsharp",
            OperationId::Sharpen => "sharpen",
            OperationId::Brightness => "brightness",
        }
    }

    pub fn schema(&self) -> &'static [ParamSpec] {
        match self {
            OperationId::Denoise => DENOISE,
            OperationId::Bilateral => BILATERAL,
            OperationId::Clahe => CLAHE,
            OperationId::Unsharp => UNSHARP,
            OperationId::Sharpen => SHARPEN,
            OperationId::Brightness => BRIGHTNESS,
        }
    }

    pub fn param(&self, name: &str) -> Option<&'static ParamSpec> {
        self.schema().iter().find(|spec| spec.name == name)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationId {
    type Err = PanelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        OperationId::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| PanelError::UnknownOperation(value.to_string()))
    }
}

/// Operation plus the parameters that belong to it, in schema order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub op: OperationId,
    pub params: Vec<(String, f64)>,
}

impl OperationRequest {
    pub fn param(&self, name: &str) -> Option<f64> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationPanel {
    selected: OperationId,
    values: Vec<f64>,
}

impl Default for OperationPanel {
    fn default() -> Self {
        Self::new(OperationId::Denoise)
    }
}

impl OperationPanel {
    pub fn new(op: OperationId) -> Self {
        Self {
            selected: op,
            values: defaults_for(op),
        }
    }

    pub fn selected(&self) -> OperationId {
        self.selected
    }

    /// Switches operation, discarding every value entered for the previous one.
    pub fn select(&mut self, op: OperationId) {
        self.selected = op;
        self.values = defaults_for(op);
    }

    pub fn set(&mut self, name: &str, value: f64) -> Result<f64, PanelError> {
        let schema = self.selected.schema();
        let position = schema
            .iter()
            .position(|spec| spec.name == name)
            .ok_or_else(|| PanelError::UnknownParameter {
                op: self.selected,
                name: name.to_string(),
            })?;
        let clamped = schema[position].clamp(value);
        self.values[position] = clamped;
        Ok(clamped)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.selected
            .schema()
            .iter()
            .position(|spec| spec.name == name)
            .map(|position| self.values[position])
    }

    pub fn current_request(&self) -> OperationRequest {
        OperationRequest {
            op: self.selected,
            params: self
                .selected
                .schema()
                .iter()
                .zip(&self.values)
                .map(|(spec, value)| (spec.name.to_string(), *value))
                .collect(),
        }
    }
}

fn defaults_for(op: OperationId) -> Vec<f64> {
    op.schema().iter().map(|spec| spec.default).collect()
}
