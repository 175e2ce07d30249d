//! Symbolic-name to PV-name cross reference (`SymbolicName`, `ControlName`).

use pvlaw_common::table::Table;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ControlLawError;

/// Exact-match name map.
#[derive(Debug, Clone)]
pub struct NameMap {
    file: PathBuf,
    map: HashMap<String, String>,
}

impl NameMap {
    pub fn from_table(table: &Table) -> Result<Self, ControlLawError> {
        table.require_columns(&["SymbolicName", "ControlName"])?;
        let symbolic = table.strings("SymbolicName")?;
        let control = table.strings("ControlName")?;
        let mut map = HashMap::with_capacity(symbolic.len());
        for (s, c) in symbolic.iter().zip(control) {
            if map.insert(s.clone(), c.clone()).is_some() {
                return Err(ControlLawError::invalid(
                    table.path(),
                    format!("symbolic name {s} listed twice"),
                ));
            }
        }
        Ok(Self {
            file: table.path().to_path_buf(),
            map,
        })
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// PV names for `names`, failing with every unmatched name.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<String>, ControlLawError> {
        let mut resolved = Vec::with_capacity(names.len());
        let mut unmatched = Vec::new();
        for name in names {
            match self.map.get(name) {
                Some(pv) => resolved.push(pv.clone()),
                None => unmatched.push(name.clone()),
            }
        }
        if unmatched.is_empty() {
            Ok(resolved)
        } else {
            Err(ControlLawError::Unmatched {
                file: self.file.clone(),
                names: unmatched,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_lists_all_unmatched() {
        let t = Table::from_toml_str(
            r#"
[columns]
SymbolicName = ["BPM1", "HCM1"]
ControlName = ["S1:BPM1:X", "S1:HCM1:I"]
"#,
            Path::new("xref.toml"),
        )
        .unwrap();
        let map = NameMap::from_table(&t).unwrap();
        let names = vec!["HCM1".to_string(), "BPM1".to_string()];
        assert_eq!(map.resolve(&names).unwrap(), vec!["S1:HCM1:I", "S1:BPM1:X"]);

        let names = vec!["BPM1".to_string(), "BPM2".to_string(), "BPM".to_string()];
        match map.resolve(&names).unwrap_err() {
            ControlLawError::Unmatched { names, .. } => assert_eq!(names, vec!["BPM2", "BPM"]),
            other => panic!("unexpected: {other}"),
        }
    }
}
