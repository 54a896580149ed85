//! Interface description loading.

use alloy_json_abi::{Event, Function, JsonAbi};
use serde_json::Value;

use crate::ContractError;

/// A parsed contract ABI. Accepts either a bare entry array or a compiler
/// artifact carrying an `abi` field.
#[derive(Debug, Clone)]
pub struct InterfaceDescription {
    abi: JsonAbi,
}

impl InterfaceDescription {
    pub fn from_json(raw: &str) -> Result<Self, ContractError> {
        let invalid = |err: serde_json::Error| ContractError::Interface(format!("invalid ABI JSON: {err}"));
        let mut document: Value = serde_json::from_str(raw).map_err(invalid)?;
        let entries = match document.get_mut("abi") {
            Some(abi) => abi.take(),
            None => document,
        };
        let abi = serde_json::from_value(entries).map_err(invalid)?;
        Ok(Self { abi })
    }

    pub fn function(&self, name: &str) -> Result<&Function, ContractError> {
        single("function", name, self.abi.function(name))
    }

    pub fn event(&self, name: &str) -> Result<&Event, ContractError> {
        single("event", name, self.abi.event(name))
    }
}

fn single<'a, T>(kind: &str, name: &str, found: Option<&'a Vec<T>>) -> Result<&'a T, ContractError> {
    match found.map(Vec::as_slice) {
        Some([entry]) => Ok(entry),
        Some([]) | None => Err(ContractError::Interface(format!("{kind} '{name}' not in ABI"))),
        Some(_) => Err(ContractError::Interface(format!(
            "{kind} '{name}' is overloaded; overloads are not supported"
        ))),
    }
}
