//! Keyed, append-only record of measurement outcomes.
//!
//! A single log is shared by every partition of a simulated state. Each
//! measurement appends one record (the measured values, one per qubit) under
//! its key; sampled branch indices of probabilistic channels are kept in a
//! separate list under the same key space. Nothing is ever overwritten.

use std::{ cell::RefCell, fmt, rc::Rc };
use itertools::Itertools;
use rustc_hash::FxHashMap;
use crate::{
    error::{ Result, SimError },
    qid::Qid,
};

/// Shared handle to a log.
pub type SharedLog = Rc<RefCell<ClassicalDataLog>>;

/// Measurement outcomes and channel branch indices, indexed by key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassicalDataLog {
    keys: Vec<String>, // first-write order
    qubits: FxHashMap<String, Vec<Qid>>,
    records: FxHashMap<String, Vec<Vec<usize>>>,
    channel_records: FxHashMap<String, Vec<usize>>,
}

impl fmt::Display for ClassicalDataLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.keys.len();
        for (k, key) in self.keys.iter().enumerate() {
            write!(f, "{}=", key)?;
            if let Some(records) = self.records.get(key) {
                let s = records.iter()
                    .map(|rec| rec.iter().join(""))
                    .join(",");
                write!(f, "{}", s)?;
            }
            if let Some(idx) = self.channel_records.get(key) {
                write!(f, "[{}]", idx.iter().join(","))?;
            }
            if k < n - 1 { write!(f, " ")?; }
        }
        Ok(())
    }
}

impl ClassicalDataLog {
    /// Create a new, empty log behind a shared handle.
    pub fn shared() -> SharedLog { Rc::new(RefCell::new(Self::default())) }

    fn touch(&mut self, key: &str) {
        if !self.keys.iter().any(|k| k == key) {
            self.keys.push(key.to_string());
        }
    }

    /// Append a measurement record under `key`.
    ///
    /// Fails if `key` was previously used for a measurement on a different
    /// number of qubits, or if `values` does not match `qubits`.
    pub fn record_measurement(
        &mut self,
        key: &str,
        qubits: &[Qid],
        values: Vec<usize>,
    ) -> Result<()>
    {
        if values.len() != qubits.len() {
            return Err(SimError::ShapeMismatch {
                expected: vec![qubits.len()],
                found: vec![values.len()],
            });
        }
        if let Some(prev) = self.qubits.get(key) {
            if prev.len() != qubits.len() {
                return Err(SimError::ShapeMismatch {
                    expected: vec![prev.len()],
                    found: vec![qubits.len()],
                });
            }
        } else {
            self.qubits.insert(key.to_string(), qubits.to_vec());
        }
        self.touch(key);
        self.records.entry(key.to_string()).or_default().push(values);
        Ok(())
    }

    /// Append the index of a sampled channel branch under `key`.
    pub fn record_channel(&mut self, key: &str, index: usize) {
        self.touch(key);
        self.channel_records.entry(key.to_string()).or_default().push(index);
    }

    /// All keys, in the order they were first written.
    pub fn keys(&self) -> &[String] { &self.keys }

    /// All measurement records under `key`, oldest first.
    pub fn records(&self, key: &str) -> Option<&[Vec<usize>]> {
        self.records.get(key).map(|r| r.as_slice())
    }

    /// The most recent measurement record under `key`.
    pub fn last(&self, key: &str) -> Option<&[usize]> {
        self.records.get(key)
            .and_then(|r| r.last())
            .map(|rec| rec.as_slice())
    }

    /// Qubits measured under `key`, as of the first record.
    pub fn measured_qubits(&self, key: &str) -> Option<&[Qid]> {
        self.qubits.get(key).map(|q| q.as_slice())
    }

    /// Sampled branch indices under `key`, oldest first.
    pub fn channel_records(&self, key: &str) -> Option<&[usize]> {
        self.channel_records.get(key).map(|r| r.as_slice())
    }

    /// Number of measurement records under `key`.
    pub fn num_records(&self, key: &str) -> usize {
        self.records.get(key).map(|r| r.len()).unwrap_or(0)
    }

    /// `true` if the latest value recorded under `key` is non-zero. Channel
    /// branch indices count when no measurement record exists.
    pub fn condition_holds(&self, key: &str) -> bool {
        match self.last(key) {
            Some(rec) => rec.iter().any(|&v| v != 0),
            None => {
                self.channel_records.get(key)
                    .and_then(|r| r.last())
                    .is_some_and(|&idx| idx != 0)
            },
        }
    }

    pub fn is_empty(&self) -> bool { self.keys.is_empty() }
}
