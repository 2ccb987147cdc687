//! Core types for the hub client
//!
//! Modules, interface roles and protocol versions are the lookup key into the
//! endpoint directory. They carry no state of their own.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseTypeError;

/// Functional module of the roaming protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleId {
    Credentials,
    Locations,
    Tariffs,
    Sessions,
    Cdrs,
    Tokens,
    Commands,
    ChargingProfiles,
    HubClientInfo,
}

impl ModuleId {
    /// Module identifier as used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleId::Credentials => "credentials",
            ModuleId::Locations => "locations",
            ModuleId::Tariffs => "tariffs",
            ModuleId::Sessions => "sessions",
            ModuleId::Cdrs => "cdrs",
            ModuleId::Tokens => "tokens",
            ModuleId::Commands => "commands",
            ModuleId::ChargingProfiles => "chargingprofiles",
            ModuleId::HubClientInfo => "hubclientinfo",
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleId {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "credentials" => Ok(ModuleId::Credentials),
            "locations" => Ok(ModuleId::Locations),
            "tariffs" => Ok(ModuleId::Tariffs),
            "sessions" => Ok(ModuleId::Sessions),
            "cdrs" => Ok(ModuleId::Cdrs),
            "tokens" => Ok(ModuleId::Tokens),
            "commands" => Ok(ModuleId::Commands),
            "chargingprofiles" => Ok(ModuleId::ChargingProfiles),
            "hubclientinfo" => Ok(ModuleId::HubClientInfo),
            _ => Err(ParseTypeError::Module(s.to_string())),
        }
    }
}

/// Which side of a module's data flow a party plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterfaceRole {
    Sender,
    Receiver,
}

impl InterfaceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceRole::Sender => "SENDER",
            InterfaceRole::Receiver => "RECEIVER",
        }
    }
}

impl fmt::Display for InterfaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceRole {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SENDER" => Ok(InterfaceRole::Sender),
            "RECEIVER" => Ok(InterfaceRole::Receiver),
            _ => Err(ParseTypeError::Role(s.to_string())),
        }
    }
}

/// Protocol version negotiated with a remote party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "2.1.1")]
    V2_1_1,
    #[serde(rename = "2.2")]
    V2_2,
    #[serde(rename = "2.2.1")]
    V2_2_1,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V2_1_1 => "2.1.1",
            ProtocolVersion::V2_2 => "2.2",
            ProtocolVersion::V2_2_1 => "2.2.1",
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        ProtocolVersion::V2_2_1
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2.1.1" => Ok(ProtocolVersion::V2_1_1),
            "2.2" => Ok(ProtocolVersion::V2_2),
            "2.2.1" => Ok(ProtocolVersion::V2_2_1),
            _ => Err(ParseTypeError::Version(s.to_string())),
        }
    }
}

/// Logical destination of a call, resolved to a base URL by the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleTarget {
    pub module: ModuleId,
    pub role: InterfaceRole,
    pub version: Option<ProtocolVersion>,
}

impl ModuleTarget {
    pub fn new(module: ModuleId, role: InterfaceRole) -> Self {
        Self {
            module,
            role,
            version: None,
        }
    }

    /// Pin the target to a specific protocol version
    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn sender(module: ModuleId) -> Self {
        Self::new(module, InterfaceRole::Sender)
    }

    pub fn receiver(module: ModuleId) -> Self {
        Self::new(module, InterfaceRole::Receiver)
    }
}

impl fmt::Display for ModuleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(v) => write!(f, "{}/{}@{}", self.module, self.role, v),
            None => write!(f, "{}/{}", self.module, self.role),
        }
    }
}
