//! Windows registry access through the `StdRegProv` WMI provider.

use std::collections::BTreeMap;

use tracing::debug;
use winrm_protocol::cim::{CimProperties, CimValue, ParamValue};
use winrm_protocol::schema::wmi;

use crate::client::WinRmClient;
use crate::error::WinRmError;

fn registry_uri() -> String {
    wmi("StdRegProv", "default")
}

/// Registry hives addressable over WMI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hive {
    ClassesRoot,
    CurrentUser,
    LocalMachine,
    Users,
    CurrentConfig,
}

impl Hive {
    /// The `hDefKey` handle value.
    pub fn handle(self) -> u64 {
        match self {
            Hive::ClassesRoot => 0x8000_0000,
            Hive::CurrentUser => 0x8000_0001,
            Hive::LocalMachine => 0x8000_0002,
            Hive::Users => 0x8000_0003,
            Hive::CurrentConfig => 0x8000_0005,
        }
    }
}

/// Registry value types with their WMI type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryValueType {
    String,
    ExpandString,
    Binary,
    DWord,
    MultiString,
    QWord,
}

impl RegistryValueType {
    pub fn code(self) -> u32 {
        match self {
            RegistryValueType::String => 1,
            RegistryValueType::ExpandString => 2,
            RegistryValueType::Binary => 3,
            RegistryValueType::DWord => 4,
            RegistryValueType::MultiString => 7,
            RegistryValueType::QWord => 11,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(RegistryValueType::String),
            2 => Some(RegistryValueType::ExpandString),
            3 => Some(RegistryValueType::Binary),
            4 => Some(RegistryValueType::DWord),
            7 => Some(RegistryValueType::MultiString),
            11 => Some(RegistryValueType::QWord),
            _ => None,
        }
    }
}

/// A typed registry value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryValue {
    String(String),
    ExpandString(String),
    MultiString(Vec<String>),
    Binary(Vec<u8>),
    DWord(u32),
    QWord(u64),
}

impl RegistryValue {
    pub fn value_type(&self) -> RegistryValueType {
        match self {
            RegistryValue::String(_) => RegistryValueType::String,
            RegistryValue::ExpandString(_) => RegistryValueType::ExpandString,
            RegistryValue::MultiString(_) => RegistryValueType::MultiString,
            RegistryValue::Binary(_) => RegistryValueType::Binary,
            RegistryValue::DWord(_) => RegistryValueType::DWord,
            RegistryValue::QWord(_) => RegistryValueType::QWord,
        }
    }
}

/// Name and reported type of one value in a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryValueInfo {
    pub name: String,
    pub value_type: Option<RegistryValueType>,
}

/// Entry point for registry operations.
#[derive(Clone)]
pub struct Registry {
    client: WinRmClient,
}

impl Registry {
    pub(crate) fn new(client: WinRmClient) -> Self {
        Self { client }
    }

    pub fn hklm(&self) -> RegistryKey {
        self.tree(Hive::LocalMachine)
    }

    pub fn hkcu(&self) -> RegistryKey {
        self.tree(Hive::CurrentUser)
    }

    pub fn hkcr(&self) -> RegistryKey {
        self.tree(Hive::ClassesRoot)
    }

    pub fn hku(&self) -> RegistryKey {
        self.tree(Hive::Users)
    }

    pub fn hkcc(&self) -> RegistryKey {
        self.tree(Hive::CurrentConfig)
    }

    /// The root key of a hive.
    pub fn tree(&self, hive: Hive) -> RegistryKey {
        RegistryKey {
            client: self.client.clone(),
            hive,
            path: String::new(),
        }
    }

    pub fn key(&self, hive: Hive, path: impl Into<String>) -> RegistryKey {
        RegistryKey {
            client: self.client.clone(),
            hive,
            path: path.into(),
        }
    }
}

/// Accessor for one registry key. Creating the accessor performs no I/O;
/// the key does not need to exist until an operation touches it.
#[derive(Clone)]
pub struct RegistryKey {
    client: WinRmClient,
    hive: Hive,
    path: String,
}

impl std::fmt::Debug for RegistryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryKey")
            .field("hive", &self.hive)
            .field("path", &self.path)
            .finish()
    }
}

impl RegistryKey {
    pub fn hive(&self) -> Hive {
        self.hive
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Child accessor; empty segments are absorbed.
    pub fn key(&self, subpath: &str) -> RegistryKey {
        RegistryKey {
            client: self.client.clone(),
            hive: self.hive,
            path: join_path(&self.path, subpath),
        }
    }

    async fn invoke(
        &self,
        method: &str,
        params: Vec<(&str, ParamValue)>,
    ) -> Result<CimProperties, WinRmError> {
        debug!(method, hive = ?self.hive, path = %self.path, "registry operation");
        self.client
            .invoke(&registry_uri(), method, &params, None)
            .await
    }

    fn key_params(&self) -> Vec<(&'static str, ParamValue)> {
        vec![
            ("hDefKey", ParamValue::UInt(self.hive.handle())),
            ("sSubKeyName", ParamValue::Str(self.path.clone())),
        ]
    }

    fn value_params(&self, name: &str) -> Vec<(&'static str, ParamValue)> {
        let mut params = self.key_params();
        params.push(("sValueName", ParamValue::Str(name.to_string())));
        params
    }

    /// Creates this key (and any missing parents).
    pub async fn create(&self) -> Result<(), WinRmError> {
        self.invoke("CreateKey", self.key_params()).await?;
        Ok(())
    }

    /// Deletes this key.
    pub async fn delete(&self) -> Result<(), WinRmError> {
        self.invoke("DeleteKey", self.key_params()).await?;
        Ok(())
    }

    /// Deletes a value inside this key.
    pub async fn delete_value(&self, name: &str) -> Result<(), WinRmError> {
        self.invoke("DeleteValue", self.value_params(name)).await?;
        Ok(())
    }

    /// Lists the values inside this key with their reported types.
    pub async fn list_values(&self) -> Result<Vec<RegistryValueInfo>, WinRmError> {
        let output = self.invoke("EnumValues", self.key_params()).await?;

        let names = output.get("sNames").cloned().unwrap_or(CimValue::Null);
        let types = output.get("Types").cloned().unwrap_or(CimValue::Null);

        let types: Vec<Option<RegistryValueType>> = types
            .into_vec()
            .into_iter()
            .map(|value| {
                value
                    .as_int()
                    .and_then(|code| u32::try_from(code).ok())
                    .and_then(RegistryValueType::from_code)
            })
            .collect();

        Ok(names
            .into_vec()
            .into_iter()
            .enumerate()
            .map(|(index, name)| RegistryValueInfo {
                name: name.display().unwrap_or_default(),
                value_type: types.get(index).copied().flatten(),
            })
            .collect())
    }

    /// Lists the subkeys of this key.
    pub async fn list_subkeys(&self) -> Result<Vec<String>, WinRmError> {
        let output = self.invoke("EnumKey", self.key_params()).await?;
        Ok(output
            .get("sNames")
            .cloned()
            .unwrap_or(CimValue::Null)
            .into_vec()
            .into_iter()
            .filter_map(|value| value.display())
            .collect())
    }

    /// Reads a value of a known type.
    pub async fn get_value(
        &self,
        name: &str,
        value_type: RegistryValueType,
    ) -> Result<RegistryValue, WinRmError> {
        Ok(match value_type {
            RegistryValueType::String => RegistryValue::String(self.get_string(name).await?),
            RegistryValueType::ExpandString => {
                RegistryValue::ExpandString(self.get_expand_string(name).await?)
            }
            RegistryValueType::MultiString => {
                RegistryValue::MultiString(self.get_multi_string(name).await?)
            }
            RegistryValueType::Binary => RegistryValue::Binary(self.get_binary(name).await?),
            RegistryValueType::DWord => RegistryValue::DWord(self.get_dword(name).await?),
            RegistryValueType::QWord => RegistryValue::QWord(self.get_qword(name).await?),
        })
    }

    /// Writes a value, dispatching on its type.
    pub async fn set_value(&self, name: &str, value: &RegistryValue) -> Result<(), WinRmError> {
        match value {
            RegistryValue::String(text) => self.set_string(name, text).await,
            RegistryValue::ExpandString(text) => self.set_expand_string(name, text).await,
            RegistryValue::MultiString(items) => self.set_multi_string(name, items).await,
            RegistryValue::Binary(bytes) => self.set_binary(name, bytes).await,
            RegistryValue::DWord(value) => self.set_dword(name, *value).await,
            RegistryValue::QWord(value) => self.set_qword(name, *value).await,
        }
    }

    pub async fn get_string(&self, name: &str) -> Result<String, WinRmError> {
        let output = self.invoke("GetStringValue", self.value_params(name)).await?;
        string_output(&output, "sValue")
    }

    pub async fn set_string(&self, name: &str, value: &str) -> Result<(), WinRmError> {
        let mut params = self.value_params(name);
        params.push(("sValue", ParamValue::Str(value.to_string())));
        self.invoke("SetStringValue", params).await?;
        Ok(())
    }

    pub async fn get_expand_string(&self, name: &str) -> Result<String, WinRmError> {
        let output = self
            .invoke("GetExpandedStringValue", self.value_params(name))
            .await?;
        string_output(&output, "sValue")
    }

    pub async fn set_expand_string(&self, name: &str, value: &str) -> Result<(), WinRmError> {
        let mut params = self.value_params(name);
        params.push(("sValue", ParamValue::Str(value.to_string())));
        self.invoke("SetExpandedStringValue", params).await?;
        Ok(())
    }

    pub async fn get_multi_string(&self, name: &str) -> Result<Vec<String>, WinRmError> {
        let output = self
            .invoke("GetMultiStringValue", self.value_params(name))
            .await?;
        Ok(output
            .get("sValue")
            .cloned()
            .unwrap_or(CimValue::Null)
            .into_vec()
            .into_iter()
            .filter_map(|value| value.display())
            .collect())
    }

    pub async fn set_multi_string(&self, name: &str, values: &[String]) -> Result<(), WinRmError> {
        let mut params = self.value_params(name);
        params.push(("sValue", ParamValue::StrArray(values.to_vec())));
        self.invoke("SetMultiStringValue", params).await?;
        Ok(())
    }

    pub async fn get_binary(&self, name: &str) -> Result<Vec<u8>, WinRmError> {
        let output = self.invoke("GetBinaryValue", self.value_params(name)).await?;
        output
            .get("uValue")
            .cloned()
            .unwrap_or(CimValue::Null)
            .into_vec()
            .into_iter()
            .map(|value| {
                value
                    .as_int()
                    .and_then(|byte| u8::try_from(byte).ok())
                    .ok_or_else(|| {
                        WinRmError::protocol("GetBinaryValue returned a non-byte element")
                    })
            })
            .collect()
    }

    pub async fn set_binary(&self, name: &str, value: &[u8]) -> Result<(), WinRmError> {
        let mut params = self.value_params(name);
        params.push((
            "uValue",
            ParamValue::UIntArray(value.iter().map(|byte| u64::from(*byte)).collect()),
        ));
        self.invoke("SetBinaryValue", params).await?;
        Ok(())
    }

    pub async fn get_dword(&self, name: &str) -> Result<u32, WinRmError> {
        let output = self.invoke("GetDWORDValue", self.value_params(name)).await?;
        let value = unsigned_output(&output, "uValue")?;
        u32::try_from(value)
            .map_err(|_| WinRmError::protocol("GetDWORDValue returned an out-of-range value"))
    }

    pub async fn set_dword(&self, name: &str, value: u32) -> Result<(), WinRmError> {
        let mut params = self.value_params(name);
        params.push(("uValue", ParamValue::UInt(u64::from(value))));
        self.invoke("SetDWORDValue", params).await?;
        Ok(())
    }

    pub async fn get_qword(&self, name: &str) -> Result<u64, WinRmError> {
        let output = self.invoke("GetQWORDValue", self.value_params(name)).await?;
        unsigned_output(&output, "uValue")
    }

    pub async fn set_qword(&self, name: &str, value: u64) -> Result<(), WinRmError> {
        let mut params = self.value_params(name);
        params.push(("uValue", ParamValue::UInt(value)));
        self.invoke("SetQWORDValue", params).await?;
        Ok(())
    }

    /// Snapshot of every value in this key, typed by the reported codes.
    /// One `EnumValues` plus one read per entry.
    pub async fn values(&self) -> Result<BTreeMap<String, Option<RegistryValue>>, WinRmError> {
        let mut snapshot = BTreeMap::new();
        for info in self.list_values().await? {
            let value = match info.value_type {
                Some(value_type) => Some(self.get_value(&info.name, value_type).await?),
                None => None,
            };
            snapshot.insert(info.name, value);
        }
        Ok(snapshot)
    }
}

fn join_path(base: &str, subpath: &str) -> String {
    match (base.is_empty(), subpath.is_empty()) {
        (_, true) => base.to_string(),
        (true, false) => subpath.to_string(),
        (false, false) => format!("{base}\\{subpath}"),
    }
}

fn string_output(output: &CimProperties, key: &str) -> Result<String, WinRmError> {
    output
        .get(key)
        .and_then(CimValue::display)
        .ok_or_else(|| WinRmError::protocol(format!("registry response missing {key}")))
}

fn unsigned_output(output: &CimProperties, key: &str) -> Result<u64, WinRmError> {
    let value = output
        .get(key)
        .ok_or_else(|| WinRmError::protocol(format!("registry response missing {key}")))?;
    match value {
        CimValue::Int(number) if *number >= 0 => Ok(*number as u64),
        // Values beyond i64::MAX arrive as strings; QWORD needs them.
        CimValue::Str(text) => text
            .parse::<u64>()
            .map_err(|_| WinRmError::protocol(format!("registry response has non-numeric {key}"))),
        _ => Err(WinRmError::protocol(format!(
            "registry response has non-numeric {key}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hive_handles_match_the_winreg_constants() {
        assert_eq!(Hive::ClassesRoot.handle(), 0x8000_0000);
        assert_eq!(Hive::CurrentUser.handle(), 0x8000_0001);
        assert_eq!(Hive::LocalMachine.handle(), 0x8000_0002);
        assert_eq!(Hive::Users.handle(), 0x8000_0003);
        assert_eq!(Hive::CurrentConfig.handle(), 0x8000_0005);
    }

    #[test]
    fn value_type_codes_round_trip() {
        for value_type in [
            RegistryValueType::String,
            RegistryValueType::ExpandString,
            RegistryValueType::Binary,
            RegistryValueType::DWord,
            RegistryValueType::MultiString,
            RegistryValueType::QWord,
        ] {
            assert_eq!(RegistryValueType::from_code(value_type.code()), Some(value_type));
        }
        assert_eq!(RegistryValueType::from_code(5), None);
    }

    #[test]
    fn path_joining_absorbs_empty_segments() {
        assert_eq!(join_path("", "SOFTWARE"), "SOFTWARE");
        assert_eq!(join_path("SOFTWARE", ""), "SOFTWARE");
        assert_eq!(join_path("SOFTWARE", "Vendor\\App"), "SOFTWARE\\Vendor\\App");
        assert_eq!(join_path("", ""), "");
    }

    #[test]
    fn unsigned_output_handles_large_qwords() {
        let mut output = CimProperties::new();
        output.insert("uValue".into(), CimValue::Str("18446744073709551615".into()));
        assert_eq!(unsigned_output(&output, "uValue").unwrap(), u64::MAX);

        output.insert("uValue".into(), CimValue::Int(42));
        assert_eq!(unsigned_output(&output, "uValue").unwrap(), 42);
    }

    #[test]
    fn string_output_accepts_coerced_scalars() {
        let mut output = CimProperties::new();
        output.insert("sValue".into(), CimValue::Int(42));
        assert_eq!(string_output(&output, "sValue").unwrap(), "42");

        output.insert("sValue".into(), CimValue::Str("text".into()));
        assert_eq!(string_output(&output, "sValue").unwrap(), "text");
    }
}
