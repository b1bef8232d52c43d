//! Side effects of the messages a CPE sends: Inform processing, transfer
//! reports, fault recording and the per-response data-model learning, plus
//! selection and encoding of the next queued method call.

use std::{collections::BTreeMap, sync::Arc};

use cwmp::{
    AddObject, AutonomousTransferComplete, Body, DeleteObject, Download, Envelope, FactoryReset,
    Fault, GetParameterAttributes, GetParameterAttributesResponse, GetParameterNames,
    GetParameterNamesResponse, GetParameterValues, GetParameterValuesResponse, GetRpcMethods,
    GetRpcMethodsResponse, Inform, ParameterValue, Reboot, SetParameterAttributes,
    SetParameterAttributesStruct, SetParameterValues, SoapNamespace, TransferComplete, Upload,
    parse_time_or_epoch,
};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{AcsServer, Device, Error, SyncKind, Values};

/// The standard method set assumed when a CPE answers GetRPCMethods with
/// an empty list.
const FALLBACK_METHODS: [&str; 11] = [
    "SetParameterValues",
    "GetParameterValues",
    "GetParameterNames",
    "SetParameterAttributes",
    "GetParameterAttributes",
    "AddObject",
    "DeleteObject",
    "Reboot",
    "Download",
    "Upload",
    "FactoryReset",
];

fn parse_wire_bool(value: &str) -> bool {
    matches!(value.trim(), "1" | "true")
}

impl AcsServer {
    /// Processes an Inform: creates the device on its first appearance,
    /// refreshes parameters and liveness, schedules the boot-time
    /// parameter-name sync and records an event for anything that is not
    /// purely periodic.
    pub(crate) async fn handle_inform(&self, inform: &Inform) -> Result<(), Error> {
        debug!(
            oui = inform.device_id.oui,
            product_class = inform.device_id.product_class,
            serial_number = inform.device_id.serial_number,
            events = inform.events.len(),
            "Inform"
        );

        let device_id = &inform.device_id;
        self.product_store()
            .get_product(self.schema(), &device_id.oui, &device_id.product_class)
            .await
            .ok_or_else(|| Error::UnknownProduct {
                oui: device_id.oui.clone(),
                product_class: device_id.product_class.clone(),
            })?;

        let mut values = Values::new();
        for parameter in &inform.parameter_list {
            values.insert(parameter.name.clone(), parameter.value.clone());
        }

        let current_time = parse_time_or_epoch(&inform.current_time);
        let mut last_online_status = false;

        let device = match self
            .device_store()
            .get_device(
                self.schema(),
                &device_id.oui,
                &device_id.product_class,
                &device_id.serial_number,
            )
            .await
        {
            Some(device) => {
                device.update_parameter_values(&values).await?;
                last_online_status = device.online_status();
                device
            }
            None => {
                let device = self
                    .device_store()
                    .create_device_with_inform(
                        self.schema(),
                        &device_id.oui,
                        &device_id.product_class,
                        &device_id.serial_number,
                        inform,
                    )
                    .await?;
                device
                    .push_method_call(OffsetDateTime::now_utc(), "GetRPCMethods", None)
                    .await?;
                device
            }
        };

        device.handle_alive(current_time, last_online_status).await;

        if inform.is_boot() {
            let mut arguments = Values::new();
            arguments.insert("ParameterPath".to_owned(), "Device.".to_owned());
            arguments.insert("NextLevel".to_owned(), "false".to_owned());
            device
                .push_method_call(
                    OffsetDateTime::now_utc(),
                    "GetParameterNames",
                    Some(arguments),
                )
                .await?;
        }

        if !inform.is_periodic_only() {
            let mut metadata = Values::new();
            for event in &inform.events {
                metadata.insert(event.event_code.clone(), event.command_key.clone());
            }
            if let Err(error) = device.insert_event("Inform", current_time, metadata).await {
                warn!(%error, "insert device event");
            }
        }

        Ok(())
    }

    /// Records a device-side fault against the pending call. A rejected
    /// SetParameterValues arrives as faultcode `Client`/`CWMP Fault` with
    /// per-parameter details; everything else only carries the string.
    pub(crate) async fn handle_cwmp_fault(
        &self,
        device: &Arc<dyn Device>,
        request_id: &str,
        fault: &Fault,
    ) {
        debug!(
            fault_code = fault.fault_code,
            fault_string = fault.fault_string,
            "SoapFault"
        );

        let mut fault_code = 0;
        let fault_string;
        let mut values = Values::new();

        if fault.fault_code == "Client" && fault.fault_string == "CWMP Fault" {
            for entry in &fault.detail.set_parameter_values_faults {
                debug!(
                    parameter = entry.parameter_name,
                    fault_code = entry.fault_code,
                    fault_string = entry.fault_string,
                    "SetParameterValuesFault"
                );
                values.insert(
                    entry.parameter_name.clone(),
                    format!("{}:{}", entry.fault_code, entry.fault_string),
                );
            }
            fault_code = fault.detail.fault_code.trim().parse().unwrap_or(0);
            fault_string = fault.detail.fault_string.clone();
        } else {
            fault_string = fault.fault_string.clone();
        }

        device
            .update_method_call_response(request_id, Some(values), fault_code, &fault_string)
            .await;
    }

    pub(crate) async fn handle_transfer_complete(
        &self,
        device: &Arc<dyn Device>,
        msg: &TransferComplete,
    ) -> Result<(), Error> {
        debug!(command_key = msg.command_key, "TransferComplete");

        if device.get_method_call(&msg.command_key).is_none() {
            return Ok(());
        }
        let Ok(ts) = msg.command_key.trim().parse::<i64>() else {
            return Ok(());
        };
        if ts == 0 {
            return Ok(());
        }

        let start_time = parse_time_or_epoch(&msg.start_time);
        let complete_time = parse_time_or_epoch(&msg.complete_time);
        let result = if msg.fault.fault_code == 0 {
            device
                .update_transfer_log_complete(ts, start_time, complete_time)
                .await
        } else {
            device
                .update_transfer_log_fault(
                    ts,
                    start_time,
                    complete_time,
                    msg.fault.fault_code,
                    &msg.fault.fault_string,
                )
                .await
        };
        if let Err(error) = result {
            warn!(%error, ts, "update device transfer log");
        }
        Ok(())
    }

    /// A transfer the CPE ran on its own: derive the file type and log key
    /// from the transfer URL's filename and insert a fresh log row.
    pub(crate) async fn handle_autonomous_transfer_complete(
        &self,
        device: &Arc<dyn Device>,
        msg: &AutonomousTransferComplete,
    ) -> Result<(), Error> {
        debug!(transfer_url = msg.transfer_url, "AutonomousTransferComplete");

        let filename = msg
            .transfer_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("");
        if filename.is_empty() {
            warn!(url = msg.transfer_url, "transfer URL carries no filename");
            return Ok(());
        }

        let parsed = match pm::parse_file_name(filename) {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(%error, filename, "parse transfer filename");
                return Ok(());
            }
        };

        let ts = parsed.start_time.unix_timestamp_nanos() as i64;
        if let Err(error) = device
            .insert_transfer_log_complete(
                ts,
                self.upload_bucket(),
                filename,
                parsed.file_type.as_str(),
                filename,
                parse_time_or_epoch(&msg.start_time),
                parse_time_or_epoch(&msg.complete_time),
                msg.fault.fault_code,
                &msg.fault.fault_string,
            )
            .await
        {
            warn!(%error, filename, "insert device transfer log");
        }
        Ok(())
    }

    pub(crate) async fn handle_get_rpc_methods_response(
        &self,
        device: &Arc<dyn Device>,
        request_id: &str,
        msg: &GetRpcMethodsResponse,
    ) -> Result<(), Error> {
        debug!(methods = ?msg.method_list, "GetRPCMethodsResponse");

        let mut values = Values::new();
        for method in &msg.method_list {
            values.insert(method.clone(), String::new());
        }
        device
            .update_method_call_response(request_id, Some(values), 0, "")
            .await;

        let methods: Vec<String> = if msg.method_list.is_empty() {
            FALLBACK_METHODS.iter().map(|m| (*m).to_owned()).collect()
        } else {
            msg.method_list.clone()
        };
        device.update_methods(&methods).await
    }

    pub(crate) async fn handle_get_parameter_values_response(
        &self,
        device: &Arc<dyn Device>,
        request_id: &str,
        msg: &GetParameterValuesResponse,
    ) -> Result<(), Error> {
        debug!(parameters = msg.parameter_list.len(), "GetParameterValuesResponse");

        let mut values = Values::new();
        for parameter in &msg.parameter_list {
            values.insert(parameter.name.clone(), parameter.value.clone());
        }
        device
            .update_method_call_response(request_id, Some(values.clone()), 0, "")
            .await;
        device.update_parameter_values(&values).await?;

        // First sight of typed values for this product: learn the value
        // types into the data model, once per process.
        if let Some(product) = device.product() {
            if !msg.parameter_list.is_empty()
                && self
                    .sync_flags()
                    .acquire(SyncKind::ParameterType, &product.id())
            {
                let data_model = product.data_model();
                for parameter in &msg.parameter_list {
                    if let Err(error) = data_model
                        .upsert_parameter(
                            &parameter.name,
                            parameter.xsi_type.as_deref(),
                            None,
                            None,
                            None,
                        )
                        .await
                    {
                        warn!(%error, parameter = parameter.name, "upsert data-model parameter");
                    }
                }
                tokio::spawn(async move { data_model.reload().await });
            }
        }
        Ok(())
    }

    pub(crate) async fn handle_get_parameter_names_response(
        &self,
        device: &Arc<dyn Device>,
        request_id: &str,
        msg: &GetParameterNamesResponse,
    ) -> Result<(), Error> {
        debug!(parameters = msg.parameter_list.len(), "GetParameterNamesResponse");

        let mut writables = BTreeMap::new();
        let mut values = Values::new();
        for info in &msg.parameter_list {
            let writable = parse_wire_bool(&info.writable);
            writables.insert(info.name.clone(), writable);
            values.insert(info.name.clone(), writable.to_string());
        }
        device
            .update_method_call_response(request_id, Some(values), 0, "")
            .await;
        device.update_parameter_writables(&writables).await?;

        if device.is_method_supported("GetParameterValues") {
            let mut arguments = Values::new();
            arguments.insert("Device.".to_owned(), String::new());
            device
                .push_method_call(
                    OffsetDateTime::now_utc(),
                    "GetParameterValues",
                    Some(arguments),
                )
                .await?;
        }

        if let Some(product) = device.product() {
            if !msg.parameter_list.is_empty()
                && self
                    .sync_flags()
                    .acquire(SyncKind::ParameterWritable, &product.id())
            {
                let data_model = product.data_model();
                for info in &msg.parameter_list {
                    let writable = parse_wire_bool(&info.writable);
                    if let Err(error) = data_model
                        .upsert_parameter(&info.name, None, Some(writable), None, None)
                        .await
                    {
                        warn!(%error, parameter = info.name, "upsert data-model parameter");
                    }
                }
                tokio::spawn(async move { data_model.reload().await });
            }
        }
        Ok(())
    }

    pub(crate) async fn handle_get_parameter_attributes_response(
        &self,
        device: &Arc<dyn Device>,
        request_id: &str,
        msg: &GetParameterAttributesResponse,
    ) -> Result<(), Error> {
        debug!(
            parameters = msg.parameter_list.len(),
            "GetParameterAttributesResponse"
        );

        let mut notifications = BTreeMap::new();
        let mut values = Values::new();
        for attributes in &msg.parameter_list {
            notifications.insert(attributes.name.clone(), attributes.notification);
            values.insert(attributes.name.clone(), attributes.notification.to_string());
        }
        device
            .update_method_call_response(request_id, Some(values), 0, "")
            .await;
        device.update_parameter_notifications(&notifications).await
    }

    /// Pops queued calls in FIFO order and encodes the first deliverable
    /// one. Calls naming a method the engine cannot encode are marked
    /// `Unknown` and skipped. The returned envelope carries the call's
    /// command key as its `cwmp:ID` and the call is marked `Sent`.
    pub(crate) async fn next_message(
        &self,
        ns: &SoapNamespace,
        device: &Arc<dyn Device>,
    ) -> Option<Envelope> {
        let data_model = device.product().map(|product| product.data_model());

        loop {
            let call = device.next_method_call()?;
            let command_key = call.command_key.clone();

            let body = match call.method_name.as_str() {
                "GetRPCMethods" => Some(Body::GetRpcMethods(GetRpcMethods {})),
                "GetParameterNames" => Some(Body::GetParameterNames(GetParameterNames {
                    parameter_path: call.request_value("ParameterPath").to_owned(),
                    next_level: call.request_value("NextLevel").to_owned(),
                })),
                "GetParameterValues" => {
                    let parameter_names = if call.request_values.is_empty() {
                        device.parameter_names("", false)
                    } else {
                        call.request_values.keys().cloned().collect()
                    };
                    Some(Body::GetParameterValues(GetParameterValues {
                        parameter_names,
                    }))
                }
                "SetParameterValues" => {
                    let mut parameter_list = Vec::with_capacity(call.request_values.len());
                    for (name, value) in &call.request_values {
                        let xsi_type = data_model
                            .as_ref()
                            .and_then(|data_model| data_model.parameter_type(name))
                            .unwrap_or_else(|| "string".to_owned());
                        parameter_list.push(ParameterValue {
                            name: name.clone(),
                            value: value.clone(),
                            xsi_type: Some(xsi_type),
                        });
                    }
                    Some(Body::SetParameterValues(SetParameterValues {
                        parameter_list,
                        parameter_key: String::new(),
                    }))
                }
                "GetParameterAttributes" => {
                    let parameter_names = if call.request_values.is_empty() {
                        device.parameter_names("", false)
                    } else {
                        call.request_values.keys().cloned().collect()
                    };
                    Some(Body::GetParameterAttributes(GetParameterAttributes {
                        parameter_names,
                    }))
                }
                "SetParameterAttributes" => {
                    let mut parameter_list = Vec::new();
                    for (name, value) in &call.request_values {
                        let notification: i32 = value.trim().parse().unwrap_or(0);
                        // Only passive (1) and active (2) notification
                        // levels are pushed down to the device.
                        if notification == 1 || notification == 2 {
                            parameter_list.push(SetParameterAttributesStruct {
                                name: name.clone(),
                                notification_change: true,
                                notification,
                                ..Default::default()
                            });
                        }
                    }
                    Some(Body::SetParameterAttributes(SetParameterAttributes {
                        parameter_list,
                    }))
                }
                "AddObject" => Some(Body::AddObject(AddObject {
                    object_name: call.request_value("ObjectName").to_owned(),
                    parameter_key: call.request_value("ParameterKey").to_owned(),
                })),
                "DeleteObject" => Some(Body::DeleteObject(DeleteObject {
                    object_name: call.request_value("ObjectName").to_owned(),
                    parameter_key: call.request_value("ParameterKey").to_owned(),
                })),
                "Download" => Some(Body::Download(Download {
                    command_key: command_key.clone(),
                    file_type: call.request_value("FileType").to_owned(),
                    url: call.request_value("Url").to_owned(),
                    username: call.request_value("Username").to_owned(),
                    password: call.request_value("Password").to_owned(),
                    file_size: call.request_value("FileSize").trim().parse().unwrap_or(0),
                    target_file_name: call.request_value("TargetFileName").to_owned(),
                    delay_seconds: call
                        .request_value("DelaySeconds")
                        .trim()
                        .parse()
                        .unwrap_or(0),
                    success_url: call.request_value("SuccessURL").to_owned(),
                    failure_url: call.request_value("FailureURL").to_owned(),
                })),
                "Upload" => Some(Body::Upload(Upload {
                    command_key: command_key.clone(),
                    file_type: call.request_value("FileType").to_owned(),
                    url: call.request_value("Url").to_owned(),
                    username: call.request_value("Username").to_owned(),
                    password: call.request_value("Password").to_owned(),
                    delay_seconds: call
                        .request_value("DelaySeconds")
                        .trim()
                        .parse()
                        .unwrap_or(0),
                })),
                "Reboot" => Some(Body::Reboot(Reboot {
                    command_key: command_key.clone(),
                })),
                "FactoryReset" => Some(Body::FactoryReset(FactoryReset {})),
                _ => None,
            };

            match body {
                Some(body) => {
                    debug!(
                        method = call.method_name,
                        command_key = command_key,
                        "deliver device method"
                    );
                    device.update_method_call_request_sent(&command_key).await;
                    return Some(Envelope::new(command_key, ns.clone(), body));
                }
                None => {
                    warn!(
                        method = call.method_name,
                        command_key = command_key,
                        "unsupported device method"
                    );
                    device.update_method_call_unknown(&command_key).await;
                }
            }
        }
    }
}
