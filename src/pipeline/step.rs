use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::series::window::Edge;

/// Numbers are rounded to this many decimals before they take part in identity.
pub const CANONICAL_DECIMALS: usize = 6;

// ---------------------------------------------------------------------------
// Scalar – a single parameter or metadata value
// ---------------------------------------------------------------------------

/// A dynamically-typed scalar used for step parameters and cache metadata.
/// Ordered and hashable so it can live in `BTreeMap`s and sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Null,
}

// -- Manual Eq/Ord so Scalar can key ordered collections --

impl Eq for Scalar {}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scalar {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use Scalar::*;
        fn discriminant(v: &Scalar) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                Text(_) => 4,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        }
    }
}

impl std::hash::Hash for Scalar {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Scalar::Text(s) => s.hash(state),
            Scalar::Integer(i) => i.hash(state),
            Scalar::Float(f) => f.to_bits().hash(state),
            Scalar::Bool(b) => b.hash(state),
            Scalar::Null => {}
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Text(s) => write!(f, "{s}"),
            Scalar::Integer(i) => write!(f, "{i}"),
            Scalar::Float(v) => write!(f, "{v:.4}"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Null => write!(f, "<null>"),
        }
    }
}

impl Scalar {
    /// Interpret the value as an `f64` if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Float(v) => Some(*v),
            Scalar::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The canonical form: every number becomes a `Float` rounded to
    /// [`CANONICAL_DECIMALS`], with `-0` folded into `0`. Applying it twice is
    /// the same as applying it once.
    pub fn canonical(&self) -> Scalar {
        match self.as_f64() {
            Some(v) => Scalar::Float(canonical_number(v)),
            None => self.clone(),
        }
    }

    /// Type-tagged text used when hashing a canonical value.
    pub(crate) fn canonical_text(&self) -> String {
        match self.canonical() {
            Scalar::Float(v) => format!("n:{v:.prec$}", prec = CANONICAL_DECIMALS),
            Scalar::Text(s) => format!("s:{s}"),
            Scalar::Bool(b) => format!("b:{b}"),
            Scalar::Null => "null".to_string(),
            Scalar::Integer(i) => format!("n:{:.prec$}", i as f64, prec = CANONICAL_DECIMALS),
        }
    }
}

/// Round through fixed-point text so the result reprints identically.
fn canonical_number(v: f64) -> f64 {
    if !v.is_finite() {
        return v;
    }
    let text = format!("{v:.prec$}", prec = CANONICAL_DECIMALS);
    let rounded: f64 = text.parse().unwrap_or(v);
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Integer(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Integer(v as i64)
    }
}

impl From<u32> for Scalar {
    fn from(v: u32) -> Self {
        Scalar::Integer(v as i64)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

// ---------------------------------------------------------------------------
// ProcessingStep / ProcessingTrail
// ---------------------------------------------------------------------------

/// A named operation with its parameters. Parameters live in a `BTreeMap`, so
/// insertion order never matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessingStep {
    pub operation: String,
    #[serde(default)]
    pub params: BTreeMap<String, Scalar>,
}

impl ProcessingStep {
    pub fn new(operation: impl Into<String>) -> Self {
        ProcessingStep {
            operation: operation.into(),
            params: BTreeMap::new(),
        }
    }

    /// Builder-style parameter insertion.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn lowpass(fc: f64, order: u32) -> Self {
        Self::new("lowpass_filter").with("fc", fc).with("order", order)
    }

    pub fn highpass(fc: f64, order: u32) -> Self {
        Self::new("highpass_filter").with("fc", fc).with("order", order)
    }

    pub fn bandpass(fc_low: f64, fc_high: f64, order: u32) -> Self {
        Self::new("bandpass_filter")
            .with("fc_low", fc_low)
            .with("fc_high", fc_high)
            .with("order", order)
    }

    pub fn rotate(angle: f64) -> Self {
        Self::new("rotate").with("angle", angle)
    }

    pub fn scale(factor: f64) -> Self {
        Self::new("scale").with("factor", factor)
    }

    pub fn integrate() -> Self {
        Self::new("integrate")
    }

    pub fn differentiate() -> Self {
        Self::new("differentiate")
    }

    /// Operation name trimmed and lower-cased, every number canonical.
    pub fn canonical(&self) -> ProcessingStep {
        ProcessingStep {
            operation: self.operation.trim().to_ascii_lowercase(),
            params: self
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.canonical()))
                .collect(),
        }
    }
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.operation)?;
        for (i, (k, v)) in self.params.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, ")")
    }
}

/// Ordered steps applied to a raw base. Order is significant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessingTrail(Vec<ProcessingStep>);

impl ProcessingTrail {
    pub fn new(steps: Vec<ProcessingStep>) -> Self {
        ProcessingTrail(steps)
    }

    pub fn steps(&self) -> &[ProcessingStep] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProcessingStep> {
        self.0.iter()
    }

    /// A new trail with `step` appended.
    pub fn then(&self, step: ProcessingStep) -> ProcessingTrail {
        let mut steps = self.0.clone();
        steps.push(step);
        ProcessingTrail(steps)
    }

    /// This trail followed by `other`.
    pub fn concat(&self, other: &ProcessingTrail) -> ProcessingTrail {
        ProcessingTrail(self.0.iter().chain(other.0.iter()).cloned().collect())
    }

    pub fn canonical(&self) -> ProcessingTrail {
        ProcessingTrail(self.0.iter().map(ProcessingStep::canonical).collect())
    }
}

impl From<Vec<ProcessingStep>> for ProcessingTrail {
    fn from(steps: Vec<ProcessingStep>) -> Self {
        ProcessingTrail(steps)
    }
}

impl FromIterator<ProcessingStep> for ProcessingTrail {
    fn from_iter<I: IntoIterator<Item = ProcessingStep>>(iter: I) -> Self {
        ProcessingTrail(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ProcessingTrail {
    type Item = &'a ProcessingStep;
    type IntoIter = std::slice::Iter<'a, ProcessingStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Operation – a step parsed into typed arguments
// ---------------------------------------------------------------------------

/// Every operation the pipeline knows how to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Lowpass { fc: f64, order: u32 },
    Highpass { fc: f64, order: u32 },
    Bandpass { fc_low: f64, fc_high: f64, order: u32 },
    Rotate { angle: f64 },
    Scale { factor: f64 },
    Shift { seconds: f64 },
    Taper { edge: Edge, m: usize },
    Cut { edge: Edge, seconds: f64, m: usize },
    ZeroPad { edge: Edge, seconds: f64, m: usize },
    Window { t_start: f64, t_end: f64 },
    Integrate { initial: f64 },
    Differentiate,
}

/// Typed access to a step's parameters, tracking which ones were consumed.
struct Params<'a> {
    operation: &'a str,
    params: &'a BTreeMap<String, Scalar>,
    allowed: &'static [&'static str],
}

impl<'a> Params<'a> {
    fn new(step: &'a ProcessingStep, operation: &'a str, allowed: &'static [&'static str]) -> Result<Self> {
        if let Some(extra) = step.params.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(Error::invalid_params(
                operation,
                format!("unexpected parameter '{extra}' (accepted: {})", allowed.join(", ")),
            ));
        }
        Ok(Params {
            operation,
            params: &step.params,
            allowed,
        })
    }

    fn optional_float(&self, name: &str) -> Result<Option<f64>> {
        debug_assert!(self.allowed.contains(&name));
        match self.params.get(name) {
            None => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(|| {
                Error::invalid_params(self.operation, format!("'{name}' must be numeric, got {v}"))
            }),
        }
    }

    fn float(&self, name: &str) -> Result<f64> {
        self.optional_float(name)?
            .ok_or_else(|| Error::invalid_params(self.operation, format!("missing parameter '{name}'")))
    }

    fn count(&self, name: &str, default: Option<usize>) -> Result<usize> {
        let value = match (self.optional_float(name)?, default) {
            (Some(v), _) => v,
            (None, Some(d)) => return Ok(d),
            (None, None) => {
                return Err(Error::invalid_params(
                    self.operation,
                    format!("missing parameter '{name}'"),
                ))
            }
        };
        if value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
            return Err(Error::invalid_params(
                self.operation,
                format!("'{name}' must be a non-negative integer, got {value}"),
            ));
        }
        Ok(value as usize)
    }

    fn order(&self) -> Result<u32> {
        Ok(self.count("order", None)? as u32)
    }

    fn edge(&self, name: &str) -> Result<Edge> {
        let text = self
            .params
            .get(name)
            .and_then(Scalar::as_str)
            .ok_or_else(|| Error::invalid_params(self.operation, format!("'{name}' must be text")))?;
        text.parse()
            .map_err(|reason: String| Error::invalid_params(self.operation, reason))
    }
}

impl Operation {
    /// Parse and type-check a step. Unknown operation names and unexpected or
    /// malformed parameters are errors.
    pub fn parse(step: &ProcessingStep) -> Result<Operation> {
        let name = step.operation.trim().to_ascii_lowercase();
        let op = name.as_str();

        let parsed = match op {
            "lowpass_filter" => {
                let p = Params::new(step, op, &["fc", "order"])?;
                Operation::Lowpass {
                    fc: p.float("fc")?,
                    order: p.order()?,
                }
            }
            "highpass_filter" => {
                let p = Params::new(step, op, &["fc", "order"])?;
                Operation::Highpass {
                    fc: p.float("fc")?,
                    order: p.order()?,
                }
            }
            "bandpass_filter" => {
                let p = Params::new(step, op, &["fc_low", "fc_high", "order"])?;
                Operation::Bandpass {
                    fc_low: p.float("fc_low")?,
                    fc_high: p.float("fc_high")?,
                    order: p.order()?,
                }
            }
            "rotate" => {
                let p = Params::new(step, op, &["angle"])?;
                Operation::Rotate {
                    angle: p.float("angle")?,
                }
            }
            "scale" => {
                let p = Params::new(step, op, &["factor"])?;
                Operation::Scale {
                    factor: p.float("factor")?,
                }
            }
            "shift" => {
                let p = Params::new(step, op, &["seconds"])?;
                Operation::Shift {
                    seconds: p.float("seconds")?,
                }
            }
            "taper" => {
                let p = Params::new(step, op, &["flag", "m"])?;
                Operation::Taper {
                    edge: p.edge("flag")?,
                    m: p.count("m", None)?,
                }
            }
            "cut" => {
                let p = Params::new(step, op, &["flag", "seconds", "m"])?;
                Operation::Cut {
                    edge: p.edge("flag")?,
                    seconds: p.float("seconds")?,
                    m: p.count("m", Some(0))?,
                }
            }
            "zero_pad" => {
                let p = Params::new(step, op, &["flag", "seconds", "m"])?;
                Operation::ZeroPad {
                    edge: p.edge("flag")?,
                    seconds: p.float("seconds")?,
                    m: p.count("m", Some(0))?,
                }
            }
            "window" => {
                let p = Params::new(step, op, &["t_start", "t_end"])?;
                Operation::Window {
                    t_start: p.float("t_start")?,
                    t_end: p.float("t_end")?,
                }
            }
            "integrate" => {
                let p = Params::new(step, op, &["initial"])?;
                Operation::Integrate {
                    initial: p.optional_float("initial")?.unwrap_or(0.0),
                }
            }
            "differentiate" => {
                Params::new(step, op, &[])?;
                Operation::Differentiate
            }
            _ => {
                return Err(Error::UnknownOperation {
                    operation: step.operation.clone(),
                })
            }
        };
        Ok(parsed)
    }

    /// Name used in error messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Lowpass { .. } => "lowpass_filter",
            Operation::Highpass { .. } => "highpass_filter",
            Operation::Bandpass { .. } => "bandpass_filter",
            Operation::Rotate { .. } => "rotate",
            Operation::Scale { .. } => "scale",
            Operation::Shift { .. } => "shift",
            Operation::Taper { .. } => "taper",
            Operation::Cut { .. } => "cut",
            Operation::ZeroPad { .. } => "zero_pad",
            Operation::Window { .. } => "window",
            Operation::Integrate { .. } => "integrate",
            Operation::Differentiate => "differentiate",
        }
    }
}
