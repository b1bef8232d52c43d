use std::{io::Read, str::FromStr};

use crate::{
    DecodeError,
    message::{
        AddObject, AddObjectResponse, AutonomousTransferComplete,
        AutonomousTransferCompleteResponse, Body, CwmpFault, DeleteObject, DeleteObjectResponse,
        DeviceId, Download, DownloadResponse, Envelope, EventStruct, FactoryReset,
        FactoryResetResponse, Fault, FaultStruct, GetParameterAttributes,
        GetParameterAttributesResponse, GetParameterNames, GetParameterNamesResponse,
        GetParameterValues, GetParameterValuesResponse, GetRpcMethods, GetRpcMethodsResponse,
        Inform, InformResponse, ParameterAttributes, ParameterInfo, ParameterValue, Reboot,
        RebootResponse, SetParameterAttributes, SetParameterAttributesResponse,
        SetParameterAttributesStruct, SetParameterValues, SetParameterValuesFault,
        SetParameterValuesResponse, TransferComplete, TransferCompleteResponse, Upload,
        UploadResponse,
    },
    ns::SoapNamespace,
    util::clean_xml,
    xmlutil::XmlReader,
};

impl Envelope {
    /// Decodes a CWMP SOAP envelope. The payload is sanitized first: some
    /// firmware emits the illegal codepoint U+0010, which is replaced with
    /// a space before the XML parser sees it.
    pub fn decode(data: &[u8]) -> Result<Envelope, DecodeError> {
        let cleaned = clean_xml(data);
        let mut reader = XmlReader::new(cleaned.as_slice());

        let root = reader
            .next_element()?
            .ok_or_else(|| DecodeError::from("empty document"))?;
        if root.name.local_name != "Envelope" {
            return Err(format!("unexpected document element {}", root.name).into());
        }
        let ns = SoapNamespace::from_scope(&root.namespaces)?;

        let mut id = None;
        let mut body = None;
        while let Some(element) = reader.next_element()? {
            match element.name.local_name.as_str() {
                "Header" => {
                    while let Some(header) = reader.next_element()? {
                        if header.name.local_name == "ID" {
                            id = Some(reader.text()?.unwrap_or_default());
                        } else {
                            // HoldRequests, SessionTimeout and friends are
                            // tolerated but carry nothing we act on.
                            reader.skip()?;
                        }
                    }
                }
                "Body" => body = Some(decode_body(&mut reader)?),
                _ => reader.skip()?,
            }
        }

        let body = body.ok_or(DecodeError::UnsupportedBody)?;
        Ok(Envelope { ns, id, body })
    }
}

fn decode_body<R: Read>(reader: &mut XmlReader<R>) -> Result<Body, DecodeError> {
    let mut body = None;

    while let Some(element) = reader.next_element()? {
        if body.is_some() {
            reader.skip()?;
            continue;
        }

        body = match element.name.local_name.as_str() {
            "Fault" => Some(Body::Fault(decode_fault(reader)?)),
            "Inform" => Some(Body::Inform(decode_inform(reader)?)),
            "InformResponse" => Some(Body::InformResponse(decode_inform_response(reader)?)),
            "TransferComplete" => Some(Body::TransferComplete(decode_transfer_complete(reader)?)),
            "TransferCompleteResponse" => {
                reader.skip()?;
                Some(Body::TransferCompleteResponse(TransferCompleteResponse {}))
            }
            "AutonomousTransferComplete" => Some(Body::AutonomousTransferComplete(
                decode_autonomous_transfer_complete(reader)?,
            )),
            "AutonomousTransferCompleteResponse" => {
                reader.skip()?;
                Some(Body::AutonomousTransferCompleteResponse(
                    AutonomousTransferCompleteResponse {},
                ))
            }
            "GetRPCMethods" => {
                reader.skip()?;
                Some(Body::GetRpcMethods(GetRpcMethods {}))
            }
            "GetRPCMethodsResponse" => Some(Body::GetRpcMethodsResponse(
                decode_get_rpc_methods_response(reader)?,
            )),
            "SetParameterValues" => Some(Body::SetParameterValues(decode_set_parameter_values(
                reader,
            )?)),
            "SetParameterValuesResponse" => {
                let mut msg = SetParameterValuesResponse::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.local_name.as_str() {
                        "Status" | "status" => msg.status = int(reader)?,
                        _ => reader.skip()?,
                    }
                }
                Some(Body::SetParameterValuesResponse(msg))
            }
            "GetParameterValues" => {
                let mut msg = GetParameterValues::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.local_name.as_str() {
                        "ParameterNames" => msg.parameter_names = decode_string_list(reader)?,
                        _ => reader.skip()?,
                    }
                }
                Some(Body::GetParameterValues(msg))
            }
            "GetParameterValuesResponse" => {
                let mut msg = GetParameterValuesResponse::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.local_name.as_str() {
                        "ParameterList" => msg.parameter_list = decode_parameter_values(reader)?,
                        _ => reader.skip()?,
                    }
                }
                Some(Body::GetParameterValuesResponse(msg))
            }
            "GetParameterNames" => {
                let mut msg = GetParameterNames::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.local_name.as_str() {
                        "ParameterPath" => msg.parameter_path = text(reader)?,
                        "NextLevel" => msg.next_level = text(reader)?,
                        _ => reader.skip()?,
                    }
                }
                Some(Body::GetParameterNames(msg))
            }
            "GetParameterNamesResponse" => {
                let mut msg = GetParameterNamesResponse::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.local_name.as_str() {
                        "ParameterList" => msg.parameter_list = decode_parameter_infos(reader)?,
                        _ => reader.skip()?,
                    }
                }
                Some(Body::GetParameterNamesResponse(msg))
            }
            "SetParameterAttributes" => Some(Body::SetParameterAttributes(
                decode_set_parameter_attributes(reader)?,
            )),
            "SetParameterAttributesResponse" => {
                reader.skip()?;
                Some(Body::SetParameterAttributesResponse(
                    SetParameterAttributesResponse {},
                ))
            }
            "GetParameterAttributes" => {
                let mut msg = GetParameterAttributes::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.local_name.as_str() {
                        "ParameterNames" => msg.parameter_names = decode_string_list(reader)?,
                        _ => reader.skip()?,
                    }
                }
                Some(Body::GetParameterAttributes(msg))
            }
            "GetParameterAttributesResponse" => Some(Body::GetParameterAttributesResponse(
                decode_get_parameter_attributes_response(reader)?,
            )),
            "AddObject" => {
                let mut msg = AddObject::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.local_name.as_str() {
                        "ObjectName" => msg.object_name = text(reader)?,
                        "ParameterKey" => msg.parameter_key = text(reader)?,
                        _ => reader.skip()?,
                    }
                }
                Some(Body::AddObject(msg))
            }
            "AddObjectResponse" => {
                let mut msg = AddObjectResponse::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.local_name.as_str() {
                        "InstanceNumber" => msg.instance_number = int(reader)?,
                        "Status" | "status" => msg.status = int(reader)?,
                        _ => reader.skip()?,
                    }
                }
                Some(Body::AddObjectResponse(msg))
            }
            "DeleteObject" => {
                let mut msg = DeleteObject::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.local_name.as_str() {
                        "ObjectName" => msg.object_name = text(reader)?,
                        "ParameterKey" => msg.parameter_key = text(reader)?,
                        _ => reader.skip()?,
                    }
                }
                Some(Body::DeleteObject(msg))
            }
            "DeleteObjectResponse" => {
                let mut msg = DeleteObjectResponse::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.local_name.as_str() {
                        "Status" | "status" => msg.status = int(reader)?,
                        _ => reader.skip()?,
                    }
                }
                Some(Body::DeleteObjectResponse(msg))
            }
            "Download" => Some(Body::Download(decode_download(reader)?)),
            "DownloadResponse" => {
                let mut msg = DownloadResponse::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.local_name.as_str() {
                        "Status" | "status" => msg.status = int(reader)?,
                        "StartTime" => msg.start_time = text(reader)?,
                        "CompleteTime" => msg.complete_time = text(reader)?,
                        _ => reader.skip()?,
                    }
                }
                Some(Body::DownloadResponse(msg))
            }
            "Upload" => {
                let mut msg = Upload::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.local_name.as_str() {
                        "CommandKey" => msg.command_key = text(reader)?,
                        "FileType" => msg.file_type = text(reader)?,
                        "URL" => msg.url = text(reader)?,
                        "Username" => msg.username = text(reader)?,
                        "Password" => msg.password = text(reader)?,
                        "DelaySeconds" => msg.delay_seconds = int(reader)?,
                        _ => reader.skip()?,
                    }
                }
                Some(Body::Upload(msg))
            }
            "UploadResponse" => {
                let mut msg = UploadResponse::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.local_name.as_str() {
                        "Status" | "status" => msg.status = int(reader)?,
                        "StartTime" => msg.start_time = text(reader)?,
                        "CompleteTime" => msg.complete_time = text(reader)?,
                        _ => reader.skip()?,
                    }
                }
                Some(Body::UploadResponse(msg))
            }
            "Reboot" => {
                let mut msg = Reboot::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.local_name.as_str() {
                        "CommandKey" => msg.command_key = text(reader)?,
                        _ => reader.skip()?,
                    }
                }
                Some(Body::Reboot(msg))
            }
            "RebootResponse" => {
                reader.skip()?;
                Some(Body::RebootResponse(RebootResponse {}))
            }
            "FactoryReset" => {
                reader.skip()?;
                Some(Body::FactoryReset(FactoryReset {}))
            }
            "FactoryResetResponse" => {
                reader.skip()?;
                Some(Body::FactoryResetResponse(FactoryResetResponse {}))
            }
            _ => {
                reader.skip()?;
                None
            }
        };
    }

    body.ok_or(DecodeError::UnsupportedBody)
}

fn text<R: Read>(reader: &mut XmlReader<R>) -> Result<String, DecodeError> {
    Ok(reader.text()?.unwrap_or_default())
}

fn int<R: Read, T>(reader: &mut XmlReader<R>) -> Result<T, DecodeError>
where
    T: FromStr + Default,
{
    let value = text(reader)?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(T::default());
    }
    trimmed
        .parse()
        .map_err(|_| format!("invalid numeric value {trimmed:?}").into())
}

fn boolean<R: Read>(reader: &mut XmlReader<R>) -> Result<bool, DecodeError> {
    let value = text(reader)?;
    Ok(matches!(value.trim(), "1" | "true"))
}

/// Decodes a SOAP-ENC array of `<string>` entries.
fn decode_string_list<R: Read>(reader: &mut XmlReader<R>) -> Result<Vec<String>, DecodeError> {
    let mut strings = Vec::new();
    while let Some(element) = reader.next_element()? {
        if element.name.local_name == "string" {
            strings.push(text(reader)?);
        } else {
            reader.skip()?;
        }
    }
    Ok(strings)
}

fn decode_parameter_values<R: Read>(
    reader: &mut XmlReader<R>,
) -> Result<Vec<ParameterValue>, DecodeError> {
    let mut values = Vec::new();
    while let Some(element) = reader.next_element()? {
        if element.name.local_name != "ParameterValueStruct" {
            reader.skip()?;
            continue;
        }

        let mut value = ParameterValue::default();
        while let Some(child) = reader.next_element()? {
            match child.name.local_name.as_str() {
                "Name" => value.name = text(reader)?,
                "Value" => {
                    // The attribute arrives prefixed (`xsd:string`); only the
                    // bare type name is kept. The prefix is re-applied from
                    // the session namespaces on encode.
                    value.xsi_type = child
                        .attribute("type")
                        .map(|t| t.rsplit(':').next().unwrap_or(t).to_owned());
                    value.value = text(reader)?;
                }
                _ => reader.skip()?,
            }
        }
        values.push(value);
    }
    Ok(values)
}

fn decode_parameter_infos<R: Read>(
    reader: &mut XmlReader<R>,
) -> Result<Vec<ParameterInfo>, DecodeError> {
    let mut infos = Vec::new();
    while let Some(element) = reader.next_element()? {
        if element.name.local_name != "ParameterInfoStruct" {
            reader.skip()?;
            continue;
        }

        let mut info = ParameterInfo::default();
        while let Some(child) = reader.next_element()? {
            match child.name.local_name.as_str() {
                "Name" => info.name = text(reader)?,
                "Writable" => info.writable = text(reader)?,
                _ => reader.skip()?,
            }
        }
        infos.push(info);
    }
    Ok(infos)
}

fn decode_fault<R: Read>(reader: &mut XmlReader<R>) -> Result<Fault, DecodeError> {
    let mut fault = Fault::default();
    while let Some(element) = reader.next_element()? {
        match element.name.local_name.as_str() {
            "faultcode" => fault.fault_code = text(reader)?,
            "faultstring" => fault.fault_string = text(reader)?,
            "detail" => {
                while let Some(child) = reader.next_element()? {
                    if child.name.local_name == "Fault" {
                        fault.detail = decode_cwmp_fault(reader)?;
                    } else {
                        reader.skip()?;
                    }
                }
            }
            _ => reader.skip()?,
        }
    }
    Ok(fault)
}

fn decode_cwmp_fault<R: Read>(reader: &mut XmlReader<R>) -> Result<CwmpFault, DecodeError> {
    let mut fault = CwmpFault::default();
    while let Some(element) = reader.next_element()? {
        match element.name.local_name.as_str() {
            "FaultCode" => fault.fault_code = text(reader)?,
            "FaultString" => fault.fault_string = text(reader)?,
            "SetParameterValuesFault" => {
                let mut entry = SetParameterValuesFault::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.local_name.as_str() {
                        "ParameterName" => entry.parameter_name = text(reader)?,
                        "FaultCode" => entry.fault_code = int(reader)?,
                        "FaultString" => entry.fault_string = text(reader)?,
                        _ => reader.skip()?,
                    }
                }
                fault.set_parameter_values_faults.push(entry);
            }
            _ => reader.skip()?,
        }
    }
    Ok(fault)
}

fn decode_fault_struct<R: Read>(reader: &mut XmlReader<R>) -> Result<FaultStruct, DecodeError> {
    let mut fault = FaultStruct::default();
    while let Some(element) = reader.next_element()? {
        match element.name.local_name.as_str() {
            "FaultCode" => fault.fault_code = int(reader)?,
            "FaultString" => fault.fault_string = text(reader)?,
            _ => reader.skip()?,
        }
    }
    Ok(fault)
}

fn decode_inform<R: Read>(reader: &mut XmlReader<R>) -> Result<Inform, DecodeError> {
    let mut inform = Inform::default();
    while let Some(element) = reader.next_element()? {
        match element.name.local_name.as_str() {
            "DeviceId" => {
                let mut device_id = DeviceId::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.local_name.as_str() {
                        "Manufacturer" => device_id.manufacturer = text(reader)?,
                        "OUI" => device_id.oui = text(reader)?,
                        "ProductClass" => device_id.product_class = text(reader)?,
                        "SerialNumber" => device_id.serial_number = text(reader)?,
                        _ => reader.skip()?,
                    }
                }
                inform.device_id = device_id;
            }
            "Event" => {
                while let Some(child) = reader.next_element()? {
                    if child.name.local_name != "EventStruct" {
                        reader.skip()?;
                        continue;
                    }
                    let mut event = EventStruct::default();
                    while let Some(field) = reader.next_element()? {
                        match field.name.local_name.as_str() {
                            "EventCode" => event.event_code = text(reader)?,
                            "CommandKey" => event.command_key = text(reader)?,
                            _ => reader.skip()?,
                        }
                    }
                    inform.events.push(event);
                }
            }
            "MaxEnvelopes" => inform.max_envelopes = int(reader)?,
            "CurrentTime" => inform.current_time = text(reader)?,
            "RetryCount" => inform.retry_count = int(reader)?,
            "ParameterList" => inform.parameter_list = decode_parameter_values(reader)?,
            _ => reader.skip()?,
        }
    }
    Ok(inform)
}

fn decode_inform_response<R: Read>(
    reader: &mut XmlReader<R>,
) -> Result<InformResponse, DecodeError> {
    let mut msg = InformResponse::default();
    while let Some(element) = reader.next_element()? {
        match element.name.local_name.as_str() {
            "MaxEnvelopes" => msg.max_envelopes = int(reader)?,
            _ => reader.skip()?,
        }
    }
    Ok(msg)
}

fn decode_transfer_complete<R: Read>(
    reader: &mut XmlReader<R>,
) -> Result<TransferComplete, DecodeError> {
    let mut msg = TransferComplete::default();
    while let Some(element) = reader.next_element()? {
        match element.name.local_name.as_str() {
            "CommandKey" => msg.command_key = text(reader)?,
            "FaultStruct" => msg.fault = decode_fault_struct(reader)?,
            "StartTime" => msg.start_time = text(reader)?,
            "CompleteTime" => msg.complete_time = text(reader)?,
            _ => reader.skip()?,
        }
    }
    Ok(msg)
}

fn decode_autonomous_transfer_complete<R: Read>(
    reader: &mut XmlReader<R>,
) -> Result<AutonomousTransferComplete, DecodeError> {
    let mut msg = AutonomousTransferComplete::default();
    while let Some(element) = reader.next_element()? {
        match element.name.local_name.as_str() {
            "AnnounceURL" => msg.announce_url = text(reader)?,
            "TransferURL" => msg.transfer_url = text(reader)?,
            "IsDownload" => msg.is_download = boolean(reader)?,
            "FileType" => msg.file_type = text(reader)?,
            "FileSize" => msg.file_size = int(reader)?,
            "TargetFileName" => msg.target_file_name = text(reader)?,
            "FaultStruct" => msg.fault = decode_fault_struct(reader)?,
            "StartTime" => msg.start_time = text(reader)?,
            "CompleteTime" => msg.complete_time = text(reader)?,
            _ => reader.skip()?,
        }
    }
    Ok(msg)
}

fn decode_get_rpc_methods_response<R: Read>(
    reader: &mut XmlReader<R>,
) -> Result<GetRpcMethodsResponse, DecodeError> {
    let mut msg = GetRpcMethodsResponse::default();
    while let Some(element) = reader.next_element()? {
        match element.name.local_name.as_str() {
            "MethodList" => msg.method_list = decode_string_list(reader)?,
            _ => reader.skip()?,
        }
    }
    Ok(msg)
}

fn decode_set_parameter_values<R: Read>(
    reader: &mut XmlReader<R>,
) -> Result<SetParameterValues, DecodeError> {
    let mut msg = SetParameterValues::default();
    while let Some(element) = reader.next_element()? {
        match element.name.local_name.as_str() {
            "ParameterList" => msg.parameter_list = decode_parameter_values(reader)?,
            "ParameterKey" => msg.parameter_key = text(reader)?,
            _ => reader.skip()?,
        }
    }
    Ok(msg)
}

fn decode_set_parameter_attributes<R: Read>(
    reader: &mut XmlReader<R>,
) -> Result<SetParameterAttributes, DecodeError> {
    let mut msg = SetParameterAttributes::default();
    while let Some(element) = reader.next_element()? {
        if element.name.local_name != "ParameterList" {
            reader.skip()?;
            continue;
        }
        while let Some(entry) = reader.next_element()? {
            if entry.name.local_name != "SetParameterAttributesStruct" {
                reader.skip()?;
                continue;
            }
            let mut attributes = SetParameterAttributesStruct::default();
            while let Some(child) = reader.next_element()? {
                match child.name.local_name.as_str() {
                    "Name" => attributes.name = text(reader)?,
                    "NotificationChange" => attributes.notification_change = boolean(reader)?,
                    "Notification" => attributes.notification = int(reader)?,
                    "AccessListChange" => attributes.access_list_change = boolean(reader)?,
                    "AccessList" => attributes.access_list = decode_string_list(reader)?,
                    _ => reader.skip()?,
                }
            }
            msg.parameter_list.push(attributes);
        }
    }
    Ok(msg)
}

fn decode_get_parameter_attributes_response<R: Read>(
    reader: &mut XmlReader<R>,
) -> Result<GetParameterAttributesResponse, DecodeError> {
    let mut msg = GetParameterAttributesResponse::default();
    while let Some(element) = reader.next_element()? {
        if element.name.local_name != "ParameterList" {
            reader.skip()?;
            continue;
        }
        while let Some(entry) = reader.next_element()? {
            if entry.name.local_name != "ParameterAttributesStruct" {
                reader.skip()?;
                continue;
            }
            let mut attributes = ParameterAttributes::default();
            while let Some(child) = reader.next_element()? {
                match child.name.local_name.as_str() {
                    "Name" => attributes.name = text(reader)?,
                    "Notification" => attributes.notification = int(reader)?,
                    "AccessList" => attributes.access_list = decode_string_list(reader)?,
                    _ => reader.skip()?,
                }
            }
            msg.parameter_list.push(attributes);
        }
    }
    Ok(msg)
}

fn decode_download<R: Read>(reader: &mut XmlReader<R>) -> Result<Download, DecodeError> {
    let mut msg = Download::default();
    while let Some(element) = reader.next_element()? {
        match element.name.local_name.as_str() {
            "CommandKey" => msg.command_key = text(reader)?,
            "FileType" => msg.file_type = text(reader)?,
            "URL" => msg.url = text(reader)?,
            "Username" => msg.username = text(reader)?,
            "Password" => msg.password = text(reader)?,
            "FileSize" => msg.file_size = int(reader)?,
            "TargetFileName" => msg.target_file_name = text(reader)?,
            "DelaySeconds" => msg.delay_seconds = int(reader)?,
            "SuccessURL" => msg.success_url = text(reader)?,
            "FailureURL" => msg.failure_url = text(reader)?,
            _ => reader.skip()?,
        }
    }
    Ok(msg)
}
