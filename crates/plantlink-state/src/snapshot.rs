use indexmap::IndexMap;

use plantlink_protocol::{encode_value_update, encode_variable_list};

/// Latest formatted value per variable, plus the number of documents applied.
///
/// The first document fixes the schema; later documents only update names
/// already present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueSnapshot {
    values: IndexMap<String, String>,
    generation: u64,
}

impl ValueSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `Temp;Pressure` form used in the Accept reply.
    pub fn encode_variable_list(&self) -> String {
        encode_variable_list(self.values.keys())
    }

    /// `Temp:23.50;Pressure:101.30` form used for every published update.
    pub fn encode_values(&self) -> String {
        encode_value_update(self.values.iter())
    }

    /// Replace all contents with the first document.
    pub(crate) fn establish(&mut self, pairs: Vec<(String, String)>) {
        self.values = pairs.into_iter().collect();
        self.generation += 1;
    }

    /// Update known names; returns how many unknown names were ignored.
    pub(crate) fn update(&mut self, pairs: Vec<(String, String)>) -> usize {
        let mut ignored = 0;
        for (name, value) in pairs {
            match self.values.get_mut(&name) {
                Some(slot) => *slot = value,
                None => {
                    tracing::debug!(variable = %name, "Ignoring variable outside the established schema");
                    ignored += 1;
                }
            }
        }
        self.generation += 1;
        ignored
    }
}
