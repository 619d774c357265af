//! Unit store
//!
//! Every packet is persisted as one addressable unit. Data units are named
//! `"<pid>.qp"`, the metadata unit is always `"init.qp"`. Any flat key-value
//! byte store satisfies the [`UnitStore`] contract.

mod dir;
mod memory;

pub use self::dir::DirStore;
pub use self::memory::MemoryStore;

use std::fmt;
use std::str::FromStr;

use crate::core::{Error, Result};

/// Extension shared by all unit names
pub const UNIT_EXTENSION: &str = "qp";

/// Name of the metadata unit, without extension
pub const INIT_UNIT_STEM: &str = "init";

/// Address of one unit in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UnitId {
    /// The metadata unit
    Init,
    /// A data unit, by logical pid
    Data(u64),
}

impl UnitId {
    /// File-style name of this unit
    pub fn file_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitId::Init => write!(f, "{}.{}", INIT_UNIT_STEM, UNIT_EXTENSION),
            UnitId::Data(pid) => write!(f, "{}.{}", pid, UNIT_EXTENSION),
        }
    }
}

impl FromStr for UnitId {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        let stem = name
            .strip_suffix(UNIT_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .ok_or_else(|| Error::storage(format!("{:?} is not a unit name", name)))?;

        if stem == INIT_UNIT_STEM {
            return Ok(UnitId::Init);
        }
        if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::storage(format!("{:?} is not a unit name", name)));
        }
        // one name per pid, so "007.qp" never aliases "7.qp"
        if stem.len() > 1 && stem.starts_with('0') {
            return Err(Error::storage(format!("{:?} is not a canonical unit name", name)));
        }
        stem.parse::<u64>()
            .map(UnitId::Data)
            .map_err(|e| Error::storage(format!("{:?} is not a unit name: {}", name, e)))
    }
}

/// Flat namespace of serialized frames
pub trait UnitStore {
    /// Stores a unit, replacing any previous content
    fn put(&mut self, unit: UnitId, frame: &[u8]) -> Result<()>;

    /// Reads a unit; `Ok(None)` when it does not exist
    fn get(&self, unit: UnitId) -> Result<Option<Vec<u8>>>;

    /// Whether a unit exists
    fn contains(&self, unit: UnitId) -> Result<bool>;

    /// Deletes a unit; `Ok(false)` when it did not exist
    fn remove(&mut self, unit: UnitId) -> Result<bool>;

    /// Lists all units, in ascending order with the init unit first
    fn units(&self) -> Result<Vec<UnitId>>;
}

impl<S: UnitStore + ?Sized> UnitStore for &mut S {
    fn put(&mut self, unit: UnitId, frame: &[u8]) -> Result<()> {
        (**self).put(unit, frame)
    }

    fn get(&self, unit: UnitId) -> Result<Option<Vec<u8>>> {
        (**self).get(unit)
    }

    fn contains(&self, unit: UnitId) -> Result<bool> {
        (**self).contains(unit)
    }

    fn remove(&mut self, unit: UnitId) -> Result<bool> {
        (**self).remove(unit)
    }

    fn units(&self) -> Result<Vec<UnitId>> {
        (**self).units()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_names() {
        assert_eq!(UnitId::Init.to_string(), "init.qp");
        assert_eq!(UnitId::Data(42).file_name(), "42.qp");
    }

    #[test]
    fn test_unit_name_parsing() {
        assert_eq!("init.qp".parse::<UnitId>().unwrap(), UnitId::Init);
        assert_eq!("7.qp".parse::<UnitId>().unwrap(), UnitId::Data(7));
        assert!("7.txt".parse::<UnitId>().is_err());
        assert!("qp".parse::<UnitId>().is_err());
        assert!(".qp".parse::<UnitId>().is_err());
        assert!("+7.qp".parse::<UnitId>().is_err());
        assert!("a.qp".parse::<UnitId>().is_err());
    }

    #[test]
    fn test_unit_names_are_canonical() {
        assert_eq!("0.qp".parse::<UnitId>().unwrap(), UnitId::Data(0));
        assert_eq!("10.qp".parse::<UnitId>().unwrap(), UnitId::Data(10));
        assert!("007.qp".parse::<UnitId>().is_err());
        assert!("00.qp".parse::<UnitId>().is_err());
        for unit in [UnitId::Init, UnitId::Data(0), UnitId::Data(4_000_000)] {
            assert_eq!(unit.to_string().parse::<UnitId>().unwrap(), unit);
        }
    }

    #[test]
    fn test_unit_ordering() {
        let mut units = vec![UnitId::Data(10), UnitId::Data(2), UnitId::Init];
        units.sort();
        assert_eq!(units, vec![UnitId::Init, UnitId::Data(2), UnitId::Data(10)]);
    }
}
