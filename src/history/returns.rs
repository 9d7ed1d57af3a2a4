use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{error::Result, types::Data};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnsColumn {
    pub label: String,
    pub values: Data,
}

/// Cumulative return curves of the evaluation rollouts, one column per checkpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnsTable {
    pub columns: Vec<ReturnsColumn>,
}

impl ReturnsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a column, replacing any column with the same label
    pub fn record(&mut self, label: impl Into<String>, values: Data) {
        let label = label.into();
        match self.columns.iter_mut().find(|column| column.label == label) {
            Some(column) => column.values = values,
            None => self.columns.push(ReturnsColumn { label, values }),
        }
    }

    pub fn column(&self, label: &str) -> Option<&Data> {
        self.columns
            .iter()
            .find(|column| column.label == label)
            .map(|column| &column.values)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, postcard::to_stdvec(self)?)?;
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(postcard::from_bytes(&bytes)?)
    }

    /// Tab separated rows: step index then one value per column
    pub fn to_lines(&self) -> Vec<String> {
        let rows = self
            .columns
            .iter()
            .map(|column| column.values.len())
            .max()
            .unwrap_or(0);

        let mut lines = Vec::with_capacity(rows + 1);
        let mut header = String::from("step");
        for column in &self.columns {
            header.push('\t');
            header.push_str(&column.label);
        }
        lines.push(header);

        for i in 0..rows {
            let mut line = i.to_string();
            for column in &self.columns {
                line.push('\t');
                if let Some(value) = column.values.get(i) {
                    line.push_str(&value.to_string());
                }
            }
            lines.push(line);
        }
        lines
    }
}
