//! Payload signal extraction
//!
//! Signals are described by data, not code: each catalog entry binds a name to
//! a byte offset and a linear transform `physical = raw * scale - bias`. Adding
//! a signal means adding a [`SignalDefinition`], never touching the extraction
//! logic.

use crate::types::{CaptureError, Result, SignalReading};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// A single-byte signal definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDefinition {
    /// Signal name used for lookup
    pub name: String,
    /// Byte offset of the raw value within the payload
    pub byte_offset: usize,
    /// Scale factor applied to the raw byte
    pub scale: f64,
    /// Value subtracted after scaling
    pub bias: f64,
    /// Engineering unit (e.g., "ppm", "%")
    #[serde(default)]
    pub unit: Option<String>,
}

impl SignalDefinition {
    /// Create a new signal definition
    pub fn new(name: impl Into<String>, byte_offset: usize, scale: f64, bias: f64) -> Self {
        Self {
            name: name.into(),
            byte_offset,
            scale,
            bias,
            unit: None,
        }
    }

    /// Builder method: set the engineering unit
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Minimum payload length needed to read this signal
    pub fn required_len(&self) -> usize {
        self.byte_offset + 1
    }

    /// Convert a raw byte into its physical value
    pub fn to_physical(&self, raw: u8) -> f64 {
        f64::from(raw) * self.scale - self.bias
    }

    /// Read the signal from a payload
    pub fn extract(&self, payload: &[u8], raw: bool) -> Result<f64> {
        let byte = payload.get(self.byte_offset).copied().ok_or_else(|| {
            CaptureError::PayloadTooShort {
                signal: self.name.clone(),
                required: self.required_len(),
                actual: payload.len(),
            }
        })?;

        if raw {
            Ok(f64::from(byte))
        } else {
            Ok(self.to_physical(byte))
        }
    }
}

/// Name-indexed table of signal definitions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<SignalDefinition>", into = "Vec<SignalDefinition>")]
pub struct SignalCatalog {
    signals: BTreeMap<String, SignalDefinition>,
}

impl SignalCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in aftertreatment sensor signals
    ///
    /// - `nox`: byte 0, 0.05 ppm/bit, -200 ppm offset
    /// - `o2`: byte 1, 0.000514 %/bit, -12 % offset
    pub fn builtin() -> Self {
        Self::new()
            .with_signal(SignalDefinition::new("nox", 0, 0.05, 200.0).with_unit("ppm"))
            .with_signal(SignalDefinition::new("o2", 1, 0.000514, 12.0).with_unit("%"))
    }

    /// Builder method: add or replace a signal
    pub fn with_signal(mut self, signal: SignalDefinition) -> Self {
        self.insert(signal);
        self
    }

    /// Add or replace a signal, returning the previous definition
    pub fn insert(&mut self, signal: SignalDefinition) -> Option<SignalDefinition> {
        self.signals.insert(signal.name.clone(), signal)
    }

    /// Look up a signal by name
    pub fn get(&self, name: &str) -> Option<&SignalDefinition> {
        self.signals.get(name)
    }

    /// Iterate over all signals in name order
    pub fn iter(&self) -> impl Iterator<Item = &SignalDefinition> {
        self.signals.values()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Extract a named signal from a payload
    ///
    /// # Arguments
    /// * `payload` - Frame data bytes
    /// * `name` - Catalog signal name
    /// * `raw` - Return the untransformed byte instead of the physical value
    pub fn extract(&self, payload: &[u8], name: &str, raw: bool) -> Result<f64> {
        self.get(name)
            .ok_or_else(|| CaptureError::UnknownSignal(name.to_string()))?
            .extract(payload, raw)
    }

    /// Extract every signal that fits in the payload
    pub fn extract_all(&self, payload: &[u8], raw: bool) -> Vec<(&SignalDefinition, f64)> {
        self.iter()
            .filter_map(|signal| signal.extract(payload, raw).ok().map(|v| (signal, v)))
            .collect()
    }

    /// Physical value of every catalog signal, in name order
    ///
    /// Unlike [`extract_all`](Self::extract_all), signals that do not fit the
    /// payload are kept with an absent value so log columns stay aligned.
    pub fn readings(&self, payload: &[u8]) -> Vec<SignalReading> {
        let mut decoded = self.extract_all(payload, false).into_iter().peekable();
        self.iter()
            .map(|signal| SignalReading {
                name: signal.name.clone(),
                value: decoded
                    .next_if(|(found, _)| found.name == signal.name)
                    .map(|(_, value)| value),
            })
            .collect()
    }

    /// Signal names in column order
    pub fn names(&self) -> Vec<String> {
        self.signals.keys().cloned().collect()
    }

    /// Sub-catalog holding only `names`
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<SignalCatalog> {
        names.iter().try_fold(SignalCatalog::new(), |catalog, name| {
            let name = name.as_ref().trim();
            let signal = self
                .get(name)
                .ok_or_else(|| CaptureError::UnknownSignal(name.to_string()))?;
            Ok(catalog.with_signal(signal.clone()))
        })
    }
}

impl From<Vec<SignalDefinition>> for SignalCatalog {
    fn from(signals: Vec<SignalDefinition>) -> Self {
        signals
            .into_iter()
            .fold(SignalCatalog::new(), SignalCatalog::with_signal)
    }
}

impl From<SignalCatalog> for Vec<SignalDefinition> {
    fn from(catalog: SignalCatalog) -> Self {
        catalog.signals.into_values().collect()
    }
}

fn builtin_catalog() -> &'static SignalCatalog {
    static BUILTIN: OnceLock<SignalCatalog> = OnceLock::new();
    BUILTIN.get_or_init(SignalCatalog::builtin)
}

/// Extract a signal using the built-in catalog
pub fn extract(payload: &[u8], name: &str, raw: bool) -> Result<f64> {
    builtin_catalog().extract(payload, name, raw)
}
