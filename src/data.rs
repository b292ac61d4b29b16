use std::{
    fmt::Display,
    sync::atomic::{AtomicU64, Ordering},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{tree::value::sum_real, utils::vectors::Vec4, ArborError, ArborResult, ReadWrite};

/// Generation of phase-space and intensity-distributed samples.
pub mod generate;
/// Parquet I/O for [`DataSet`]s.
pub mod io;

/// A single raw collision event: one four-momentum per final-state particle and a weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The four-momenta of the particles, in the order of the owning collection's particle IDs.
    pub four_momenta: Vec<Vec4>,
    /// The weight given to the event.
    pub weight: f64,
}

impl Event {
    pub fn new(four_momenta: Vec<Vec4>, weight: f64) -> Self {
        Self {
            four_momenta,
            weight,
        }
    }
    /// The sum of the four-momenta at the given indices.
    pub fn get_p4_sum<T: AsRef<[usize]>>(&self, indices: T) -> Vec4 {
        Vec4::sum(indices.as_ref().iter().map(|i| &self.four_momenta[*i]))
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Event:")?;
        writeln!(f, "  p4s:")?;
        for p4 in &self.four_momenta {
            writeln!(f, "    {}", p4)?;
        }
        writeln!(f, "  weight:")?;
        writeln!(f, "    {}", self.weight)?;
        Ok(())
    }
}

/// A list of raw [`Event`]s sharing one list of particle IDs.
///
/// Every event must carry exactly one four-momentum per particle ID. The invariant is not
/// enforced on construction (events are often appended one by one) but every accessor which
/// interprets the four-momenta checks it and reports a [`ArborError::CorruptDataError`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventCollection {
    pub pids: Vec<i32>,
    pub events: Vec<Event>,
}

impl EventCollection {
    pub fn new(pids: Vec<i32>, events: Vec<Event>) -> Self {
        Self { pids, events }
    }
    /// Check that every event holds one four-momentum per particle ID.
    pub fn check_pid_matches_events(&self) -> ArborResult<()> {
        if let Some((index, event)) = self
            .events
            .iter()
            .enumerate()
            .find(|(_, event)| event.four_momenta.len() != self.pids.len())
        {
            return Err(ArborError::corrupt(format!(
                "event {} has {} four-momenta but the collection has {} particle IDs",
                index,
                event.four_momenta.len(),
                self.pids.len()
            )));
        }
        Ok(())
    }
    /// Flatten the collection into one row per event holding `(px, py, pz, e)` for each particle
    /// in turn.
    pub fn to_table(&self) -> ArborResult<Vec<Vec<f64>>> {
        self.check_pid_matches_events()?;
        Ok(self
            .events
            .iter()
            .map(|event| {
                event
                    .four_momenta
                    .iter()
                    .flat_map(|p4| [p4.px, p4.py, p4.pz, p4.e])
                    .collect()
            })
            .collect())
    }
    pub fn weights(&self) -> Vec<f64> {
        self.events.iter().map(|event| event.weight).collect()
    }
    /// Returns `true` if the events do not all share the same weight.
    pub fn has_weights(&self) -> bool {
        match self.events.split_first() {
            Some((first, rest)) => rest.iter().any(|event| event.weight != first.weight),
            None => false,
        }
    }
    pub fn len(&self) -> usize {
        self.events.len()
    }
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl ReadWrite for EventCollection {}

static NEXT_DATASET_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_DATASET_ID.fetch_add(1, Ordering::Relaxed)
}

/// Named columns of per-event values together with the event weights.
///
/// Every column and the weights have the same length. Each [`DataSet`] carries an identity which
/// a [`FunctionTree`](crate::tree::FunctionTree) uses to decide whether its data-dependent caches
/// are still valid, so a [`DataSet`] is immutable once built; the `with_*` methods return new
/// datasets with a fresh identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSet {
    #[serde(skip, default = "next_id")]
    id: u64,
    columns: IndexMap<String, Vec<f64>>,
    weights: Vec<f64>,
}

impl PartialEq for DataSet {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns && self.weights == other.weights
    }
}

impl DataSet {
    /// Create a new [`DataSet`].
    ///
    /// # Errors
    ///
    /// Returns [`ArborError::CorruptDataError`] if any column has a different length than the
    /// weights.
    pub fn new(columns: IndexMap<String, Vec<f64>>, weights: Vec<f64>) -> ArborResult<Self> {
        if let Some((name, column)) = columns
            .iter()
            .find(|(_, column)| column.len() != weights.len())
        {
            return Err(ArborError::corrupt(format!(
                "column \"{}\" has {} entries but there are {} weights",
                name,
                column.len(),
                weights.len()
            )));
        }
        Ok(Self {
            id: next_id(),
            columns,
            weights,
        })
    }
    /// Create a [`DataSet`] with unit weights from named columns.
    ///
    /// # Errors
    ///
    /// Returns [`ArborError::CorruptDataError`] if the columns have different lengths.
    pub fn from_columns<I, S>(columns: I) -> ArborResult<Self>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: AsRef<str>,
    {
        let columns: IndexMap<String, Vec<f64>> = columns
            .into_iter()
            .map(|(name, column)| (name.as_ref().to_string(), column))
            .collect();
        let n = columns.values().next().map_or(0, |column| column.len());
        Self::new(columns, vec![1.0; n])
    }
    /// A [`DataSet`] with no columns and no events.
    pub fn empty() -> Self {
        Self {
            id: next_id(),
            columns: IndexMap::new(),
            weights: Vec::new(),
        }
    }
    /// The identity used by function trees to track which dataset they are bound to.
    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn column<T: AsRef<str>>(&self, name: T) -> Option<&[f64]> {
        self.columns.get(name.as_ref()).map(|column| column.as_slice())
    }
    pub fn columns(&self) -> &IndexMap<String, Vec<f64>> {
        &self.columns
    }
    pub fn names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
    /// The sum of all event weights.
    pub fn n_events_weighted(&self) -> f64 {
        sum_real(&self.weights)
    }
    /// The number of events.
    pub fn len(&self) -> usize {
        self.weights.len()
    }
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
    /// Returns `true` if the events do not all share the same weight.
    pub fn has_weights(&self) -> bool {
        match self.weights.split_first() {
            Some((first, rest)) => rest.iter().any(|w| w != first),
            None => false,
        }
    }
    /// A copy of this dataset with the weights replaced.
    pub fn with_weights(&self, weights: Vec<f64>) -> ArborResult<Self> {
        Self::new(self.columns.clone(), weights)
    }
    /// A copy of this dataset with an additional (or replaced) column.
    pub fn with_column<T: AsRef<str>>(&self, name: T, values: Vec<f64>) -> ArborResult<Self> {
        let mut columns = self.columns.clone();
        columns.insert(name.as_ref().to_string(), values);
        Self::new(columns, self.weights.clone())
    }
    /// The events at the given indices, in the given order.
    pub fn select(&self, indices: &[usize]) -> ArborResult<Self> {
        if let Some(bad) = indices.iter().find(|i| **i >= self.len()) {
            return Err(ArborError::Custom(format!(
                "event index {} is out of range for a dataset of {} events",
                bad,
                self.len()
            )));
        }
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| (name.clone(), indices.iter().map(|i| column[*i]).collect()))
            .collect();
        let weights = indices.iter().map(|i| self.weights[*i]).collect();
        Self::new(columns, weights)
    }
    /// Export the dataset as column names and columns, with the weights as a trailing `weight`
    /// column.
    pub fn to_table(&self) -> (Vec<String>, Vec<Vec<f64>>) {
        let mut names = self.names();
        names.push("weight".to_string());
        let mut columns: Vec<Vec<f64>> = self.columns.values().cloned().collect();
        columns.push(self.weights.clone());
        (names, columns)
    }
}

impl ReadWrite for DataSet {}
