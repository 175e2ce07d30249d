//! Self-describing tabular data files.
//!
//! Every input table (gain matrices, limit files, test files, waveform index
//! files, feed-forward lookup tables) is a TOML document with two optional
//! sections:
//!
//! ```toml
//! [parameters]
//! ActuatorName = "S1:HCM1:SetCurrent"
//! ActuatorChangeLimit = 0.5
//!
//! [columns]
//! ControlName = ["S1:BPM1:X", "S1:BPM2:X"]
//! DeltaLimit  = [0.1, 0.25]
//! ```
//!
//! Column order is preserved as written. All columns must have the same
//! length. Integer columns are stored as [`Column::Long`], mixed
//! integer/float columns as [`Column::Double`], string columns as
//! [`Column::String`] and boolean columns as `Long` 0/1.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while reading or querying a table.
#[derive(Debug, Error)]
pub enum TableError {
    /// File could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or layout error.
    #[error("cannot parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// One or more required columns are absent.
    #[error("{}: missing required column(s): {}", path.display(), columns.join(", "))]
    MissingColumns { path: PathBuf, columns: Vec<String> },

    /// Column exists but holds the wrong kind of data.
    #[error("{}: column {column} is {found}, expected {expected}", path.display())]
    ColumnType {
        path: PathBuf,
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Columns of unequal length.
    #[error("{}: column {column} has {found} rows, expected {expected}", path.display())]
    Ragged {
        path: PathBuf,
        column: String,
        expected: usize,
        found: usize,
    },

    /// Array element type not representable as a column.
    #[error("{}: column {column} holds unsupported or mixed values", path.display())]
    UnsupportedValue { path: PathBuf, column: String },
}

/// Typed column data.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Double(Vec<f64>),
    Long(Vec<i64>),
    String(Vec<String>),
}

impl Column {
    /// Number of rows in the column.
    pub fn len(&self) -> usize {
        match self {
            Self::Double(v) => v.len(),
            Self::Long(v) => v.len(),
            Self::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for `Double` and `Long` columns.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::String(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Double(_) => "double",
            Self::Long(_) => "long",
            Self::String(_) => "string",
        }
    }
}

/// Scalar parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    Double(f64),
    Long(i64),
    String(String),
    Bool(bool),
}

impl Parameter {
    /// Numeric view of the parameter, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Long(v) => Some(*v as f64),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// One page of tabular data: named parameters plus equal-length columns.
#[derive(Debug, Clone)]
pub struct Table {
    path: PathBuf,
    parameters: Vec<(String, Parameter)>,
    columns: Vec<(String, Column)>,
    rows: usize,
}

impl Table {
    /// Read a table from a TOML file.
    pub fn read(path: &Path) -> Result<Self, TableError> {
        let text = std::fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Parse a table from TOML text. `origin` is used in diagnostics only.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, TableError> {
        let doc: toml::Table = toml::from_str(text).map_err(|e| TableError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut parameters = Vec::new();
        let mut columns = Vec::new();

        for (key, value) in doc {
            match (key.as_str(), value) {
                ("parameters", toml::Value::Table(entries)) => {
                    for (name, value) in entries {
                        let parameter = convert_parameter(&value).ok_or_else(|| {
                            TableError::Parse {
                                path: origin.to_path_buf(),
                                message: format!("parameter {name} is not a scalar"),
                            }
                        })?;
                        parameters.push((name, parameter));
                    }
                }
                ("columns", toml::Value::Table(entries)) => {
                    for (name, value) in entries {
                        let column = convert_column(origin, &name, value)?;
                        columns.push((name, column));
                    }
                }
                (other, _) => {
                    return Err(TableError::Parse {
                        path: origin.to_path_buf(),
                        message: format!(
                            "unexpected top-level entry '{other}' (expected [parameters] or [columns])"
                        ),
                    });
                }
            }
        }

        let mut table = Self::from_columns(origin, columns)?;
        table.parameters = parameters;
        Ok(table)
    }

    /// Build a table from already-typed columns.
    pub fn from_columns(origin: &Path, columns: Vec<(String, Column)>) -> Result<Self, TableError> {
        let rows = columns.first().map_or(0, |(_, c)| c.len());
        for (name, column) in &columns {
            if column.len() != rows {
                return Err(TableError::Ragged {
                    path: origin.to_path_buf(),
                    column: name.clone(),
                    expected: rows,
                    found: column.len(),
                });
            }
        }
        Ok(Self {
            path: origin.to_path_buf(),
            parameters: Vec::new(),
            columns,
            rows,
        })
    }

    /// Attach a parameter (builder style).
    pub fn with_parameter(mut self, name: &str, value: Parameter) -> Self {
        self.parameters.retain(|(n, _)| n != name);
        self.parameters.push((name.to_string(), value));
        self
    }

    /// Source file (or origin label) of this table.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Column names in file order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    /// Fail with every missing column listed, not just the first.
    pub fn require_columns(&self, names: &[&str]) -> Result<(), TableError> {
        let missing: Vec<String> = names
            .iter()
            .filter(|n| !self.has_column(n))
            .map(|n| n.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TableError::MissingColumns {
                path: self.path.clone(),
                columns: missing,
            })
        }
    }

    pub fn column(&self, name: &str) -> Result<&Column, TableError> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
            .ok_or_else(|| TableError::MissingColumns {
                path: self.path.clone(),
                columns: vec![name.to_string()],
            })
    }

    /// Numeric column as `f64` values (`Long` columns are widened).
    pub fn doubles(&self, name: &str) -> Result<Vec<f64>, TableError> {
        match self.column(name)? {
            Column::Double(v) => Ok(v.clone()),
            Column::Long(v) => Ok(v.iter().map(|&x| x as f64).collect()),
            Column::String(v) if v.is_empty() => Ok(Vec::new()),
            other => Err(self.type_error(name, "numeric", other)),
        }
    }

    /// String column.
    pub fn strings(&self, name: &str) -> Result<&[String], TableError> {
        match self.column(name)? {
            Column::String(v) => Ok(v),
            other if other.is_empty() => Ok(&[]),
            other => Err(self.type_error(name, "string", other)),
        }
    }

    /// Integer column. `Double` columns are accepted when every value is integral.
    pub fn longs(&self, name: &str) -> Result<Vec<i64>, TableError> {
        match self.column(name)? {
            Column::Long(v) => Ok(v.clone()),
            Column::Double(v) if v.iter().all(|x| x.fract() == 0.0) => {
                Ok(v.iter().map(|&x| x as i64).collect())
            }
            other => Err(self.type_error(name, "integer", other)),
        }
    }

    /// Boolean view: numeric non-zero, or strings `y`/`yes`/`true`/`1`.
    pub fn flags(&self, name: &str) -> Result<Vec<bool>, TableError> {
        match self.column(name)? {
            Column::Double(v) => Ok(v.iter().map(|&x| x != 0.0).collect()),
            Column::Long(v) => Ok(v.iter().map(|&x| x != 0).collect()),
            Column::String(v) => Ok(v
                .iter()
                .map(|s| {
                    matches!(
                        s.trim().to_ascii_lowercase().as_str(),
                        "y" | "yes" | "true" | "1"
                    )
                })
                .collect()),
        }
    }

    /// Numeric columns in file order.
    pub fn numeric_columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns
            .iter()
            .filter(|(_, c)| c.is_numeric())
            .map(|(n, c)| (n.as_str(), c))
    }

    /// Name of the first string column, if any.
    pub fn first_string_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|(_, c)| !c.is_numeric())
            .map(|(n, _)| n.as_str())
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn parameter_str(&self, name: &str) -> Option<&str> {
        self.parameter(name).and_then(Parameter::as_str)
    }

    pub fn parameter_f64(&self, name: &str) -> Option<f64> {
        self.parameter(name).and_then(Parameter::as_f64)
    }

    fn type_error(&self, name: &str, expected: &'static str, found: &Column) -> TableError {
        TableError::ColumnType {
            path: self.path.clone(),
            column: name.to_string(),
            expected,
            found: found.type_name(),
        }
    }
}

fn convert_parameter(value: &toml::Value) -> Option<Parameter> {
    match value {
        toml::Value::Float(v) => Some(Parameter::Double(*v)),
        toml::Value::Integer(v) => Some(Parameter::Long(*v)),
        toml::Value::String(s) => Some(Parameter::String(s.clone())),
        toml::Value::Boolean(b) => Some(Parameter::Bool(*b)),
        _ => None,
    }
}

fn convert_column(origin: &Path, name: &str, value: toml::Value) -> Result<Column, TableError> {
    let unsupported = || TableError::UnsupportedValue {
        path: origin.to_path_buf(),
        column: name.to_string(),
    };

    let toml::Value::Array(items) = value else {
        return Err(unsupported());
    };

    if items.iter().all(|v| v.is_str()) {
        return Ok(Column::String(
            items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ));
    }
    if items.iter().all(|v| v.is_integer()) {
        return Ok(Column::Long(items.iter().filter_map(toml::Value::as_integer).collect()));
    }
    if items.iter().all(|v| v.is_bool()) {
        return Ok(Column::Long(
            items
                .iter()
                .filter_map(toml::Value::as_bool)
                .map(i64::from)
                .collect(),
        ));
    }
    if items.iter().all(|v| v.is_integer() || v.is_float()) {
        return Ok(Column::Double(
            items
                .iter()
                .filter_map(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
                .collect(),
        ));
    }
    Err(unsupported())
}
