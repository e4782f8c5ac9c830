//! # Parameter files
//!
//! Parameters are TOML files kept in `$TANK_SW_ROOT/params`, deserialised straight into each
//! executable's parameter struct.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::de::DeserializeOwned;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Directory under the software root holding the parameter files.
pub const PARAMS_DIR: &str = "params";

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("Cannot find the software root directory: {0}")]
    SwRootNotFound(std::io::Error),

    #[error("Cannot load the parameter file {0:?}: {1}")]
    FileLoadError(PathBuf, std::io::Error),

    #[error("Invalid parameter file {0:?}: {1}")]
    DeserialiseError(PathBuf, toml::de::Error),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Load a parameter file by name from the `params` directory.
pub fn load<P>(file_name: &str) -> Result<P, ParamsError>
where
    P: DeserializeOwned,
{
    let root = crate::host::get_sw_root().map_err(ParamsError::SwRootNotFound)?;

    load_from_path(root.join(PARAMS_DIR).join(file_name))
}

/// Load a parameter file from an explicit path.
pub fn load_from_path<P, Q>(path: Q) -> Result<P, ParamsError>
where
    P: DeserializeOwned,
    Q: AsRef<Path>,
{
    let path = path.as_ref();

    let text =
        fs::read_to_string(path).map_err(|e| ParamsError::FileLoadError(path.into(), e))?;

    toml::from_str(&text).map_err(|e| ParamsError::DeserialiseError(path.into(), e))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Deserialize, Debug, PartialEq)]
    struct TestParams {
        port: u16,

        #[serde(default)]
        name: String,
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 5003").unwrap();

        let p: TestParams = load_from_path(file.path()).unwrap();
        assert_eq!(
            p,
            TestParams {
                port: 5003,
                name: String::new()
            }
        );
    }

    #[test]
    fn test_load_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();

        assert!(matches!(
            load_from_path::<TestParams, _>(file.path()),
            Err(ParamsError::DeserialiseError(..))
        ));
        assert!(matches!(
            load_from_path::<TestParams, _>("/definitely/not/here.toml"),
            Err(ParamsError::FileLoadError(..))
        ));
    }
}
