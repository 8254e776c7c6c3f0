use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Process type the platform launches by default.
pub const WEB_PROCESS_TYPE: &str = "web";

/// The assembled start command of a staged application.
///
/// Constructed once by the release assembler and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseManifest {
    main_command: String,
    coprocesses: Vec<String>,
    start_command: String,
}

/// Wire form handed to the platform after release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasePayload {
    pub addons: Vec<String>,
    pub config_vars: BTreeMap<String, String>,
    pub default_process_types: BTreeMap<String, String>,
}

impl ReleaseManifest {
    pub fn new(main_command: String, coprocesses: Vec<String>, start_command: String) -> Self {
        Self {
            main_command,
            coprocesses,
            start_command,
        }
    }

    pub fn main_command(&self) -> &str {
        &self.main_command
    }

    pub fn coprocesses(&self) -> &[String] {
        &self.coprocesses
    }

    /// Co-processes followed by the main command, as one shell line.
    pub fn start_command(&self) -> &str {
        &self.start_command
    }

    pub fn process_types(&self) -> BTreeMap<String, String> {
        std::iter::once((WEB_PROCESS_TYPE.to_owned(), self.start_command.clone())).collect()
    }

    pub fn payload(&self) -> ReleasePayload {
        ReleasePayload {
            addons: Vec::new(),
            config_vars: BTreeMap::new(),
            default_process_types: self.process_types(),
        }
    }

    pub fn to_yaml(&self) -> Result<String, SchemaError> {
        Ok(serde_yaml::to_string(&self.payload())?)
    }

    pub fn to_json(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string_pretty(&self.payload())?)
    }
}

impl ReleasePayload {
    pub fn from_yaml(input: &str) -> Result<Self, SchemaError> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn web_command(&self) -> Option<&str> {
        self.default_process_types
            .get(WEB_PROCESS_TYPE)
            .map(String::as_str)
    }
}
