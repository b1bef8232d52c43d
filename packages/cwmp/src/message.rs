use crate::ns::SoapNamespace;

/// Identity reported by a CPE in an Inform.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceId {
    pub manufacturer: String,
    pub oui: String,
    pub product_class: String,
    pub serial_number: String,
}

/// A single entry of an Inform event list, e.g. `0 BOOTSTRAP`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventStruct {
    pub event_code: String,
    pub command_key: String,
}

/// A named parameter value. `xsi_type` carries the `xsi:type` attribute of
/// the value: the data-model-resolved type on outbound messages, the
/// CPE-reported type on inbound ones.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterValue {
    pub name: String,
    pub value: String,
    pub xsi_type: Option<String>,
}

impl ParameterValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            xsi_type: None,
        }
    }
}

/// A parameter name plus its writability, as reported by
/// GetParameterNamesResponse. `writable` is kept as the raw wire token
/// (`0`, `1`, `true`, `false`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterInfo {
    pub name: String,
    pub writable: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetParameterAttributesStruct {
    pub name: String,
    pub notification_change: bool,
    pub notification: i32,
    pub access_list_change: bool,
    pub access_list: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterAttributes {
    pub name: String,
    pub notification: i32,
    pub access_list: Vec<String>,
}

/// Fault summary nested in TransferComplete messages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FaultStruct {
    pub fault_code: i32,
    pub fault_string: String,
}

/// Per-parameter failure detail of a rejected SetParameterValues.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetParameterValuesFault {
    pub parameter_name: String,
    pub fault_code: i32,
    pub fault_string: String,
}

/// The CWMP fault carried inside a SOAP fault detail.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CwmpFault {
    pub fault_code: String,
    pub fault_string: String,
    pub set_parameter_values_faults: Vec<SetParameterValuesFault>,
}

/// A SOAP-level fault. Decoding one is a success for the codec; whether it
/// is an error is the session engine's call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fault {
    pub fault_code: String,
    pub fault_string: String,
    pub detail: CwmpFault,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Inform {
    pub device_id: DeviceId,
    pub events: Vec<EventStruct>,
    pub max_envelopes: u32,
    pub current_time: String,
    pub retry_count: u32,
    pub parameter_list: Vec<ParameterValue>,
}

impl Inform {
    /// True when every event is periodic or an autonomous transfer report;
    /// such Informs do not produce an event record.
    pub fn is_periodic_only(&self) -> bool {
        self.events.iter().all(|event| {
            event.event_code == "2 PERIODIC" || event.event_code == "10 AUTONOMOUS TRANSFER COMPLETE"
        })
    }

    /// True when the CPE reports a boot or bootstrap, which triggers a full
    /// parameter-name sync.
    pub fn is_boot(&self) -> bool {
        self.events
            .iter()
            .any(|event| event.event_code == "0 BOOTSTRAP" || event.event_code == "1 BOOT")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InformResponse {
    pub max_envelopes: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferComplete {
    pub command_key: String,
    pub fault: FaultStruct,
    pub start_time: String,
    pub complete_time: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferCompleteResponse {}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AutonomousTransferComplete {
    pub announce_url: String,
    pub transfer_url: String,
    pub is_download: bool,
    pub file_type: String,
    pub file_size: u64,
    pub target_file_name: String,
    pub fault: FaultStruct,
    pub start_time: String,
    pub complete_time: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AutonomousTransferCompleteResponse {}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetRpcMethods {}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetRpcMethodsResponse {
    pub method_list: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetParameterValues {
    pub parameter_list: Vec<ParameterValue>,
    pub parameter_key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetParameterValuesResponse {
    pub status: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetParameterValues {
    pub parameter_names: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetParameterValuesResponse {
    pub parameter_list: Vec<ParameterValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetParameterNames {
    pub parameter_path: String,
    pub next_level: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetParameterNamesResponse {
    pub parameter_list: Vec<ParameterInfo>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetParameterAttributes {
    pub parameter_list: Vec<SetParameterAttributesStruct>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetParameterAttributesResponse {}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetParameterAttributes {
    pub parameter_names: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetParameterAttributesResponse {
    pub parameter_list: Vec<ParameterAttributes>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddObject {
    pub object_name: String,
    pub parameter_key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddObjectResponse {
    pub instance_number: u32,
    pub status: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteObject {
    pub object_name: String,
    pub parameter_key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteObjectResponse {
    pub status: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Download {
    pub command_key: String,
    pub file_type: String,
    pub url: String,
    pub username: String,
    pub password: String,
    pub file_size: u64,
    pub target_file_name: String,
    pub delay_seconds: u32,
    pub success_url: String,
    pub failure_url: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DownloadResponse {
    pub status: i32,
    pub start_time: String,
    pub complete_time: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Upload {
    pub command_key: String,
    pub file_type: String,
    pub url: String,
    pub username: String,
    pub password: String,
    pub delay_seconds: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: i32,
    pub start_time: String,
    pub complete_time: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reboot {
    pub command_key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RebootResponse {}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FactoryReset {}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FactoryResetResponse {}

/// The CWMP payload of a SOAP body. Exactly one variant per message; the
/// session engine dispatches with a single `match`.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    Fault(Fault),

    Inform(Inform),
    InformResponse(InformResponse),
    TransferComplete(TransferComplete),
    TransferCompleteResponse(TransferCompleteResponse),
    AutonomousTransferComplete(AutonomousTransferComplete),
    AutonomousTransferCompleteResponse(AutonomousTransferCompleteResponse),

    GetRpcMethods(GetRpcMethods),
    GetRpcMethodsResponse(GetRpcMethodsResponse),
    SetParameterValues(SetParameterValues),
    SetParameterValuesResponse(SetParameterValuesResponse),
    GetParameterValues(GetParameterValues),
    GetParameterValuesResponse(GetParameterValuesResponse),
    GetParameterNames(GetParameterNames),
    GetParameterNamesResponse(GetParameterNamesResponse),
    SetParameterAttributes(SetParameterAttributes),
    SetParameterAttributesResponse(SetParameterAttributesResponse),
    GetParameterAttributes(GetParameterAttributes),
    GetParameterAttributesResponse(GetParameterAttributesResponse),
    AddObject(AddObject),
    AddObjectResponse(AddObjectResponse),
    DeleteObject(DeleteObject),
    DeleteObjectResponse(DeleteObjectResponse),
    Download(Download),
    DownloadResponse(DownloadResponse),
    Upload(Upload),
    UploadResponse(UploadResponse),
    Reboot(Reboot),
    RebootResponse(RebootResponse),
    FactoryReset(FactoryReset),
    FactoryResetResponse(FactoryResetResponse),
}

impl Body {
    /// The wire name of the payload element.
    pub fn name(&self) -> &'static str {
        match self {
            Body::Fault(_) => "Fault",
            Body::Inform(_) => "Inform",
            Body::InformResponse(_) => "InformResponse",
            Body::TransferComplete(_) => "TransferComplete",
            Body::TransferCompleteResponse(_) => "TransferCompleteResponse",
            Body::AutonomousTransferComplete(_) => "AutonomousTransferComplete",
            Body::AutonomousTransferCompleteResponse(_) => "AutonomousTransferCompleteResponse",
            Body::GetRpcMethods(_) => "GetRPCMethods",
            Body::GetRpcMethodsResponse(_) => "GetRPCMethodsResponse",
            Body::SetParameterValues(_) => "SetParameterValues",
            Body::SetParameterValuesResponse(_) => "SetParameterValuesResponse",
            Body::GetParameterValues(_) => "GetParameterValues",
            Body::GetParameterValuesResponse(_) => "GetParameterValuesResponse",
            Body::GetParameterNames(_) => "GetParameterNames",
            Body::GetParameterNamesResponse(_) => "GetParameterNamesResponse",
            Body::SetParameterAttributes(_) => "SetParameterAttributes",
            Body::SetParameterAttributesResponse(_) => "SetParameterAttributesResponse",
            Body::GetParameterAttributes(_) => "GetParameterAttributes",
            Body::GetParameterAttributesResponse(_) => "GetParameterAttributesResponse",
            Body::AddObject(_) => "AddObject",
            Body::AddObjectResponse(_) => "AddObjectResponse",
            Body::DeleteObject(_) => "DeleteObject",
            Body::DeleteObjectResponse(_) => "DeleteObjectResponse",
            Body::Download(_) => "Download",
            Body::DownloadResponse(_) => "DownloadResponse",
            Body::Upload(_) => "Upload",
            Body::UploadResponse(_) => "UploadResponse",
            Body::Reboot(_) => "Reboot",
            Body::RebootResponse(_) => "RebootResponse",
            Body::FactoryReset(_) => "FactoryReset",
            Body::FactoryResetResponse(_) => "FactoryResetResponse",
        }
    }
}

/// A decoded or to-be-encoded CWMP SOAP envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub ns: SoapNamespace,
    /// The `cwmp:ID` header. Requests originated by the server use the
    /// method call's command key; replies echo the inbound ID.
    pub id: Option<String>,
    pub body: Body,
}

impl Envelope {
    pub fn new(id: impl Into<String>, ns: SoapNamespace, body: Body) -> Self {
        Self {
            ns,
            id: Some(id.into()),
            body,
        }
    }

    /// Builds a server-originated SOAP fault carrying one of the ACS fault
    /// codes from [`crate::fault`].
    pub fn fault(id: impl Into<String>, ns: SoapNamespace, code: u16, message: &str) -> Self {
        Self::new(
            id,
            ns,
            Body::Fault(Fault {
                fault_code: code.to_string(),
                fault_string: message.to_owned(),
                detail: CwmpFault::default(),
            }),
        )
    }
}
