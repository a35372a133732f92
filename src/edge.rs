//! Dependency edges - which headers a source file pulled in
//!
//! An edge `includer -> header` carries the compile arguments the includer
//! was parsed with, so a header that never appears in the compile-command
//! database can still be reparsed with sensible flags.

use crate::keys;
use crate::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// File whose translation unit included the header
    pub includer: String,
    /// Resolved path of the included header
    pub header: String,
    /// Compile arguments of the includer
    pub args: Vec<String>,
}

impl DependencyEdge {
    pub fn new(includer: impl Into<String>, header: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            includer: includer.into(),
            header: header.into(),
            args,
        }
    }

    /// Key in the `dep` namespace
    pub fn key(&self) -> String {
        keys::dependency(&self.includer, &self.header)
    }

    /// Key in the reverse `includer` namespace
    pub fn reverse_key(&self) -> String {
        keys::includer(&self.header, &self.includer)
    }

    /// Stored value: the arguments as a JSON array
    pub fn encode_args(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.args)?)
    }

    /// Rebuild an edge from a `dep` entry
    pub fn decode(key: &str, value: &str) -> Result<Self> {
        let (includer, header) = keys::parse_dependency(key)?;
        let args: Vec<String> = serde_json::from_str(value)?;
        Ok(Self {
            includer,
            header,
            args,
        })
    }
}
