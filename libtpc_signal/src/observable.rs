//! Per-event analysis observables.
//!
//! Each stage declares the observables it can provide. The pipeline binds the declared
//! set before the run, resets every bound observable to [`UNSET_OBSERVABLE`] when an event
//! starts, and lets the stage fill them: runtime observables are written by the stage
//! through an [`ObservableSink`] while it processes, field observables are read from the
//! stage after it processed.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::constants::UNSET_OBSERVABLE;

/// How much a stage records for each event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLevel {
    /// Nothing
    NoOutput,
    /// The bound observables
    #[default]
    Observable,
    /// Observables plus a snapshot of the stage parameters
    InternalVar,
    /// Everything above plus a copy of the stage's output event
    FullOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservableKind {
    /// Read from the stage after processing. May hold a map.
    Field,
    /// Set by the stage during processing. Always a scalar.
    Runtime,
}

/// An observable a stage can provide
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObservableSpec {
    pub name: String,
    pub kind: ObservableKind,
}

impl ObservableSpec {
    pub fn field(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ObservableKind::Field,
        }
    }

    pub fn runtime(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ObservableKind::Runtime,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObservableValue {
    Scalar(f64),
    Map(BTreeMap<String, f64>),
}

impl ObservableValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Map(_) => None,
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Scalar(v) if *v == UNSET_OBSERVABLE)
    }
}

impl From<f64> for ObservableValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

/// Key of an observable in the store: `<stage>.<observable>`
pub fn observable_key(stage: &str, name: &str) -> String {
    format!("{stage}.{name}")
}

/// The per-event table of observable values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservableStore {
    declared: BTreeMap<String, ObservableKind>,
    values: BTreeMap<String, ObservableValue>,
    written: BTreeSet<String>,
}

impl ObservableStore {
    pub fn declare(&mut self, stage: &str, spec: &ObservableSpec) {
        let key = observable_key(stage, &spec.name);
        self.values.insert(key.clone(), ObservableValue::Scalar(UNSET_OBSERVABLE));
        self.declared.insert(key, spec.kind);
    }

    pub fn is_declared(&self, stage: &str, name: &str) -> bool {
        self.declared.contains_key(&observable_key(stage, name))
    }

    /// Start a new event: every declared observable goes back to the sentinel
    pub fn reset(&mut self) {
        for value in self.values.values_mut() {
            *value = ObservableValue::Scalar(UNSET_OBSERVABLE);
        }
        self.written.clear();
    }

    /// Write a declared observable. Returns false if it is undeclared or was already
    /// written during this event.
    pub fn set(&mut self, stage: &str, name: &str, value: ObservableValue) -> bool {
        let key = observable_key(stage, name);
        if !self.declared.contains_key(&key) {
            return false;
        }
        if !self.written.insert(key.clone()) {
            log::warn!("Observable {key} was written twice in one event, keeping the first value");
            return false;
        }
        self.values.insert(key, value);
        true
    }

    pub fn get(&self, stage: &str, name: &str) -> Option<&ObservableValue> {
        self.values.get(&observable_key(stage, name))
    }

    pub fn values(&self) -> &BTreeMap<String, ObservableValue> {
        &self.values
    }

    /// Runtime-only writer handed to one stage while it processes an event
    pub fn sink<'a>(&'a mut self, stage: &'a str) -> ObservableSink<'a> {
        ObservableSink { store: self, stage }
    }
}

/// Write access for one stage to its runtime observables
pub struct ObservableSink<'a> {
    store: &'a mut ObservableStore,
    stage: &'a str,
}

impl ObservableSink<'_> {
    /// Set a runtime observable. Values for observables that were not bound are ignored.
    pub fn set(&mut self, name: &str, value: f64) {
        let key = observable_key(self.stage, name);
        match self.store.declared.get(&key) {
            Some(ObservableKind::Runtime) => {
                self.store.set(self.stage, name, ObservableValue::Scalar(value));
            }
            Some(ObservableKind::Field) => {
                log::warn!("Observable {key} is a field observable and cannot be set at runtime");
            }
            None => (),
        }
    }
}

/// Keep an event only if a stage observable lies in [min, max]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cut {
    pub observable: String,
    pub min: f64,
    pub max: f64,
}

impl Cut {
    pub fn passes(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_lifecycle() {
        let mut store = ObservableStore::default();
        store.declare("diffusion", &ObservableSpec::runtime("carriers"));
        store.declare("diffusion", &ObservableSpec::field("summary"));
        assert!(store.get("diffusion", "carriers").unwrap().is_unset());

        {
            let mut sink = store.sink("diffusion");
            sink.set("carriers", 12.0);
            sink.set("carriers", 13.0);
            sink.set("summary", 1.0);
            sink.set("undeclared", 1.0);
        }
        assert_eq!(store.get("diffusion", "carriers"), Some(&ObservableValue::Scalar(12.0)));
        assert!(store.get("diffusion", "summary").unwrap().is_unset());
        assert!(store.get("diffusion", "undeclared").is_none());

        let map = BTreeMap::from([(String::from("low"), 3.0)]);
        assert!(store.set("diffusion", "summary", ObservableValue::Map(map)));
        store.reset();
        assert!(store.get("diffusion", "carriers").unwrap().is_unset());
        assert!(store.get("diffusion", "summary").unwrap().is_unset());
    }

    #[test]
    fn test_output_level_order() {
        assert!(OutputLevel::NoOutput < OutputLevel::Observable);
        assert!(OutputLevel::InternalVar < OutputLevel::FullOutput);
        let level: OutputLevel = serde_yaml::from_str("internal_var").unwrap();
        assert_eq!(level, OutputLevel::InternalVar);
    }

    #[test]
    fn test_cut() {
        let cut = Cut {
            observable: String::from("energy"),
            min: 1.0,
            max: 2.0,
        };
        assert!(cut.passes(1.0));
        assert!(!cut.passes(2.5));
    }
}
