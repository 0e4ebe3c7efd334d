use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::MlError;

/// The model libraries a service can be backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MlLib {
    /// Multinomial logistic regression trained with mini-batch SGD.
    Softmax,
}

impl MlLib {
    /// The name used for this library in service configurations.
    pub fn name(self) -> &'static str {
        match self {
            Self::Softmax => "softmax",
        }
    }
}

impl fmt::Display for MlLib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MlLib {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "softmax" => Ok(Self::Softmax),
            other => Err(other.to_string()),
        }
    }
}

/// What gets removed when a service is torn down.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ClearMode {
    /// Only in-memory state is released.
    #[default]
    Mem,
    /// Snapshots and solver state written into the repository are removed as well.
    Lib,
}

impl FromStr for ClearMode {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mem" => Ok(Self::Mem),
            "lib" => Ok(Self::Lib),
            other => Err(MlError::InvalidParams(format!(
                "unknown clear mode {other}, expected mem or lib"
            ))),
        }
    }
}
