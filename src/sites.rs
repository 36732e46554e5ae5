//! Logger serial number to site code lookup.
//!
//! The table is an external collaborator: the pipeline only needs
//! `lookup`. It starts from the built-in station list and accepts
//! `SERIAL=CODE` overrides from the command line.

use crate::constants::BUILTIN_SITES;
use crate::error::{PipelineError, Result};
use std::collections::HashMap;

/// Serial number → site code mapping
#[derive(Debug, Clone, Default)]
pub struct SiteTable {
    by_serial: HashMap<String, String>,
}

impl SiteTable {
    /// Empty table; every serial number is unknown
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding the built-in field stations
    pub fn builtin() -> Self {
        Self::from_pairs(BUILTIN_SITES.iter().copied())
    }

    pub fn from_pairs<S, C>(pairs: impl IntoIterator<Item = (S, C)>) -> Self
    where
        S: Into<String>,
        C: Into<String>,
    {
        let mut table = Self::new();
        for (serial, code) in pairs {
            table.insert(serial, code);
        }
        table
    }

    /// Add or replace one mapping
    pub fn insert(&mut self, serial: impl Into<String>, code: impl Into<String>) {
        self.by_serial
            .insert(serial.into().trim().to_string(), code.into().trim().to_string());
    }

    /// Parse and insert a `SERIAL=CODE` assignment
    pub fn insert_assignment(&mut self, assignment: &str) -> Result<()> {
        let (serial, code) = parse_assignment(assignment)?;
        self.insert(serial, code);
        Ok(())
    }

    pub fn lookup(&self, serial: &str) -> Option<&str> {
        self.by_serial.get(serial.trim()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_serial.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_serial.is_empty()
    }
}

/// Split `SERIAL=CODE`, rejecting empty halves and codes unusable in file names
pub fn parse_assignment(assignment: &str) -> Result<(String, String)> {
    let (serial, code) = assignment.split_once('=').ok_or_else(|| {
        PipelineError::configuration(format!(
            "Site assignment '{}' must look like SERIAL=CODE",
            assignment
        ))
    })?;

    let serial = serial.trim();
    let code = code.trim();

    if serial.is_empty() || code.is_empty() {
        return Err(PipelineError::configuration(format!(
            "Site assignment '{}' has an empty serial number or site code",
            assignment
        )));
    }

    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(PipelineError::configuration(format!(
            "Site code '{}' may only contain letters, digits and '-'",
            code
        )));
    }

    Ok((serial.to_string(), code.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_sites() {
        let table = SiteTable::builtin();
        assert_eq!(table.len(), 6);
        assert_eq!(table.lookup("6034"), Some("CFNT"));
        assert_eq!(table.lookup("6504"), Some("WINE"));
        assert_eq!(table.lookup("1234"), None);
    }

    #[test]
    fn test_assignment_overrides() {
        let mut table = SiteTable::builtin();
        table.insert_assignment("1234=ALPHA").unwrap();
        table.insert_assignment(" 6034 = NEWC ").unwrap();

        assert_eq!(table.lookup("1234"), Some("ALPHA"));
        assert_eq!(table.lookup("6034"), Some("NEWC"));
    }

    #[test]
    fn test_invalid_assignments() {
        assert!(parse_assignment("1234").is_err());
        assert!(parse_assignment("=ALPHA").is_err());
        assert!(parse_assignment("1234=").is_err());
        assert!(parse_assignment("1234=AL_PHA").is_err());
        assert!(parse_assignment("1234=AL/PHA").is_err());
    }
}
