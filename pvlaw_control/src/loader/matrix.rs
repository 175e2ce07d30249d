//! Gain matrix file.
//!
//! One row per actuator. The actuator name comes from a string column (the
//! configured one, else the first string column); every numeric column is a
//! readback named by the column header.

use pvlaw_common::table::Table;

use crate::error::ControlLawError;
use crate::model::GainMatrix;

/// Names and coefficients read from a matrix file.
#[derive(Debug, Clone)]
pub struct MatrixFile {
    pub actuators: Vec<String>,
    pub readbacks: Vec<String>,
    pub matrix: GainMatrix,
}

pub fn load_matrix(table: &Table, actuator_column: Option<&str>) -> Result<MatrixFile, ControlLawError> {
    let file = table.path();
    let name_column = match actuator_column {
        Some(c) => {
            table.require_columns(&[c])?;
            c
        }
        None => table.first_string_column().ok_or_else(|| {
            ControlLawError::invalid(file, "no string column naming the actuators")
        })?,
    };
    let actuators = table.strings(name_column)?.to_vec();
    if actuators.is_empty() {
        return Err(ControlLawError::invalid(file, "matrix has no rows"));
    }

    let mut readbacks = Vec::new();
    let mut columns = Vec::new();
    for (name, _) in table.numeric_columns() {
        readbacks.push(name.to_string());
        columns.push(table.doubles(name)?);
    }
    if readbacks.is_empty() {
        return Err(ControlLawError::invalid(file, "matrix has no numeric readback columns"));
    }

    let mut seen = std::collections::HashSet::new();
    let duplicates: Vec<String> = actuators
        .iter()
        .filter(|a| !seen.insert(a.as_str()))
        .cloned()
        .collect();
    if !duplicates.is_empty() {
        return Err(ControlLawError::invalid(
            file,
            format!("duplicate actuator name(s): {}", duplicates.join(", ")),
        ));
    }

    for (name, column) in readbacks.iter().zip(&columns) {
        if let Some(row) = column.iter().position(|v| !v.is_finite()) {
            return Err(ControlLawError::invalid(
                file,
                format!("non-finite coefficient in column {name}, row {row}"),
            ));
        }
    }

    let matrix = GainMatrix::from_columns(actuators.len(), &columns)
        .map_err(|m| ControlLawError::invalid(file, m))?;
    Ok(MatrixFile {
        actuators,
        readbacks,
        matrix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn table(text: &str) -> Table {
        Table::from_toml_str(text, Path::new("m.toml")).unwrap()
    }

    #[test]
    fn one_readback_two_actuators() {
        let t = table(
            r#"
[columns]
ControlName = ["HCM1", "HCM2"]
BPM1 = [1.0, -2.0]
"#,
        );
        let m = load_matrix(&t, None).unwrap();
        assert_eq!(m.actuators, vec!["HCM1", "HCM2"]);
        assert_eq!(m.readbacks, vec!["BPM1"]);
        assert_eq!(m.matrix.rows(), 2);
        assert_eq!(m.matrix.cols(), 1);
        assert_eq!(m.matrix.get(1, 0), -2.0);
    }

    #[test]
    fn explicit_name_column() {
        let t = table(
            r#"
[columns]
Comment = ["a", "b"]
Actuator = ["Q1", "Q2"]
R = [1, 2]
"#,
        );
        let m = load_matrix(&t, Some("Actuator")).unwrap();
        assert_eq!(m.actuators, vec!["Q1", "Q2"]);
        assert!(load_matrix(&t, Some("Missing")).is_err());
    }

    #[test]
    fn rejects_duplicates_and_missing_numeric() {
        let dup = table("[columns]\nC = [\"A\", \"A\"]\nR = [1.0, 2.0]\n");
        assert!(load_matrix(&dup, None).unwrap_err().to_string().contains("duplicate"));
        let none = table("[columns]\nC = [\"A\"]\n");
        assert!(load_matrix(&none, None).is_err());
    }
}
