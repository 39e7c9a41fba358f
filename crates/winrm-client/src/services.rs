//! `Win32_Service` access: typed records plus the service-control method
//! invocations.

use tracing::debug;
use winrm_protocol::cim::{CimProperties, CimValue, ParamValue};
use winrm_protocol::schema::cim;
use winrm_protocol::wsman::SelectorSet;

use crate::client::WinRmClient;
use crate::error::WinRmError;

fn service_uri() -> String {
    cim("Win32_Service")
}

/// `StartMode` values accepted by `ChangeStartMode`. `Boot` and `System`
/// apply to drivers only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    Boot,
    System,
    Automatic,
    Manual,
    Disabled,
}

impl StartMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StartMode::Boot => "Boot",
            StartMode::System => "System",
            StartMode::Automatic => "Automatic",
            StartMode::Manual => "Manual",
            StartMode::Disabled => "Disabled",
        }
    }
}

/// `Win32_Service.State` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    StartPending,
    StopPending,
    Running,
    ContinuePending,
    PausePending,
    Paused,
}

impl ServiceState {
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "Stopped" => Some(ServiceState::Stopped),
            "Start Pending" => Some(ServiceState::StartPending),
            "Stop Pending" => Some(ServiceState::StopPending),
            "Running" => Some(ServiceState::Running),
            "Continue Pending" => Some(ServiceState::ContinuePending),
            "Pause Pending" => Some(ServiceState::PausePending),
            "Paused" => Some(ServiceState::Paused),
            _ => None,
        }
    }
}

/// One `Win32_Service` instance. `name` is the identity; everything else
/// is a snapshot from the moment the record was fetched.
#[derive(Debug, Clone)]
pub struct Service {
    client: WinRmClient,

    pub name: String,
    pub accept_pause: Option<bool>,
    pub accept_stop: Option<bool>,
    pub caption: Option<String>,
    pub check_point: Option<i64>,
    pub creation_class_name: Option<String>,
    pub delayed_auto_start: Option<bool>,
    pub dependencies: Option<Vec<String>>,
    pub description: Option<String>,
    pub desktop_interact: Option<bool>,
    pub display_name: Option<String>,
    pub error_control: Option<String>,
    pub exit_code: Option<i64>,
    pub install_date: Option<String>,
    pub load_order_group: Option<String>,
    pub path_name: Option<String>,
    pub process_id: Option<i64>,
    pub service_specific_exit_code: Option<i64>,
    pub service_type: Option<String>,
    pub start_mode: Option<String>,
    pub start_name: Option<String>,
    pub started: Option<bool>,
    pub state: Option<String>,
    pub status: Option<String>,
    pub system_creation_class_name: Option<String>,
    pub system_name: Option<String>,
    pub tag_id: Option<i64>,
    pub wait_hint: Option<i64>,
}

impl PartialEq for Service {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Service {}

fn opt_string(properties: &CimProperties, key: &str) -> Option<String> {
    properties.get(key).and_then(CimValue::display)
}

fn opt_bool(properties: &CimProperties, key: &str) -> Option<bool> {
    properties.get(key).and_then(CimValue::as_bool)
}

fn opt_int(properties: &CimProperties, key: &str) -> Option<i64> {
    properties.get(key).and_then(CimValue::as_int)
}

fn opt_string_list(properties: &CimProperties, key: &str) -> Option<Vec<String>> {
    properties.get(key).map(|value| {
        value
            .clone()
            .into_vec()
            .into_iter()
            .filter_map(|item| item.display())
            .collect()
    })
}

impl Service {
    fn from_properties(
        client: WinRmClient,
        properties: &CimProperties,
    ) -> Result<Self, WinRmError> {
        let name = opt_string(properties, "Name")
            .ok_or_else(|| WinRmError::protocol("Win32_Service instance missing Name"))?;

        Ok(Self {
            client,
            name,
            accept_pause: opt_bool(properties, "AcceptPause"),
            accept_stop: opt_bool(properties, "AcceptStop"),
            caption: opt_string(properties, "Caption"),
            check_point: opt_int(properties, "CheckPoint"),
            creation_class_name: opt_string(properties, "CreationClassName"),
            delayed_auto_start: opt_bool(properties, "DelayedAutoStart"),
            dependencies: opt_string_list(properties, "Dependencies"),
            description: opt_string(properties, "Description"),
            desktop_interact: opt_bool(properties, "DesktopInteract"),
            display_name: opt_string(properties, "DisplayName"),
            error_control: opt_string(properties, "ErrorControl"),
            exit_code: opt_int(properties, "ExitCode"),
            install_date: opt_string(properties, "InstallDate"),
            load_order_group: opt_string(properties, "LoadOrderGroup"),
            path_name: opt_string(properties, "PathName"),
            process_id: opt_int(properties, "ProcessId"),
            service_specific_exit_code: opt_int(properties, "ServiceSpecificExitCode"),
            service_type: opt_string(properties, "ServiceType"),
            start_mode: opt_string(properties, "StartMode"),
            start_name: opt_string(properties, "StartName"),
            started: opt_bool(properties, "Started"),
            state: opt_string(properties, "State"),
            status: opt_string(properties, "Status"),
            system_creation_class_name: opt_string(properties, "SystemCreationClassName"),
            system_name: opt_string(properties, "SystemName"),
            tag_id: opt_int(properties, "TagId"),
            wait_hint: opt_int(properties, "WaitHint"),
        })
    }

    /// The parsed `State`, when the snapshot carried one.
    pub fn service_state(&self) -> Option<ServiceState> {
        self.state.as_deref().and_then(ServiceState::from_str)
    }

    /// Fetches a fresh snapshot of this service.
    pub async fn refresh(&self) -> Result<Service, WinRmError> {
        Services::new(self.client.clone()).get(&self.name).await
    }

    async fn invoke_method(
        &self,
        method: &str,
        params: &[(&str, ParamValue)],
    ) -> Result<CimProperties, WinRmError> {
        debug!(service = %self.name, method, "service control");
        self.client
            .invoke(
                &service_uri(),
                method,
                params,
                Some(SelectorSet::new().add("Name", self.name.clone())),
            )
            .await
    }

    pub async fn start(&self) -> Result<(), WinRmError> {
        self.invoke_method("StartService", &[]).await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), WinRmError> {
        self.invoke_method("StopService", &[]).await?;
        Ok(())
    }

    /// Stop, then start.
    pub async fn restart(&self) -> Result<(), WinRmError> {
        self.stop().await?;
        self.start().await
    }

    pub async fn pause(&self) -> Result<(), WinRmError> {
        self.invoke_method("PauseService", &[]).await?;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), WinRmError> {
        self.invoke_method("ResumeService", &[]).await?;
        Ok(())
    }

    /// Removes the service from the service control manager.
    pub async fn delete(&self) -> Result<(), WinRmError> {
        self.invoke_method("Delete", &[]).await?;
        Ok(())
    }

    pub async fn change_start_mode(&self, mode: StartMode) -> Result<(), WinRmError> {
        self.invoke_method(
            "ChangeStartMode",
            &[("StartMode", ParamValue::Str(mode.as_str().to_string()))],
        )
        .await?;
        Ok(())
    }

    pub async fn disable(&self) -> Result<(), WinRmError> {
        self.change_start_mode(StartMode::Disabled).await
    }
}

/// `Win32_Service` collection accessor.
#[derive(Clone)]
pub struct Services {
    client: WinRmClient,
}

impl Services {
    pub(crate) fn new(client: WinRmClient) -> Self {
        Self { client }
    }

    /// Fetches one service by name.
    pub async fn get(&self, name: &str) -> Result<Service, WinRmError> {
        let properties = self
            .client
            .get(
                service_uri(),
                Some(SelectorSet::new().add("Name", name)),
            )
            .await?;
        Service::from_properties(self.client.clone(), &properties)
    }

    /// Enumerates every service on the host.
    pub async fn get_all(&self) -> Result<Vec<Service>, WinRmError> {
        let mut enumerator = self.client.enumerate(service_uri(), None);
        let mut services = Vec::new();
        while let Some(properties) = enumerator.next().await? {
            services.push(Service::from_properties(self.client.clone(), &properties)?);
        }
        Ok(services)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_modes_serialize_to_the_wmi_names() {
        assert_eq!(StartMode::Automatic.as_str(), "Automatic");
        assert_eq!(StartMode::Disabled.as_str(), "Disabled");
        assert_eq!(StartMode::Boot.as_str(), "Boot");
    }

    #[test]
    fn service_states_parse_the_spaced_forms() {
        assert_eq!(ServiceState::from_str("Running"), Some(ServiceState::Running));
        assert_eq!(
            ServiceState::from_str("Start Pending"),
            Some(ServiceState::StartPending)
        );
        assert_eq!(ServiceState::from_str("Hibernating"), None);
    }

    #[test]
    fn equality_is_by_name_only() {
        use crate::client::ClientOptions;
        use crate::credentials::{AuthMethod, Credentials};

        let client = WinRmClient::new(
            ClientOptions::builder()
                .endpoint("https://host")
                .auth(AuthMethod::Basic(Credentials::new("user", "password")))
                .build(),
        )
        .unwrap();

        let mut first = CimProperties::new();
        first.insert("Name".into(), CimValue::Str("Spooler".into()));
        first.insert("State".into(), CimValue::Str("Running".into()));

        let mut second = CimProperties::new();
        second.insert("Name".into(), CimValue::Str("Spooler".into()));
        second.insert("State".into(), CimValue::Str("Stopped".into()));

        let a = Service::from_properties(client.clone(), &first).unwrap();
        let b = Service::from_properties(client, &second).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.service_state(), Some(ServiceState::Running));
    }

    #[test]
    fn missing_name_is_a_protocol_error() {
        use crate::client::ClientOptions;
        use crate::credentials::{AuthMethod, Credentials};

        let client = WinRmClient::new(
            ClientOptions::builder()
                .endpoint("https://host")
                .auth(AuthMethod::Basic(Credentials::new("user", "password")))
                .build(),
        )
        .unwrap();

        let properties = CimProperties::new();
        assert!(Service::from_properties(client, &properties).is_err());
    }
}
