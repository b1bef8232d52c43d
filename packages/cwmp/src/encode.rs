use std::io::Write;

use crate::{
    message::{
        Body, Envelope, FaultStruct, ParameterAttributes, ParameterInfo, ParameterValue,
        SetParameterAttributesStruct,
    },
    ns::{SoapNamespace, XMLNS_SOAP_ENC, XMLNS_SOAP_ENV, XMLNS_XSD, XMLNS_XSI},
    xmlutil::{WriterError, XmlWriter},
};

impl Envelope {
    /// Encodes the envelope using the namespace prefixes recorded in
    /// [`Envelope::ns`], so a reply looks exactly like the CPE's own
    /// messages down to the prefix spelling.
    pub fn encode(&self) -> Result<Vec<u8>, WriterError> {
        let mut out = Vec::new();
        let ns = &self.ns;

        XmlWriter::write_document(&mut out, |writer| {
            writer
                .element_ns((XMLNS_SOAP_ENV, "Envelope"))
                .prefix(&ns.soap_env, XMLNS_SOAP_ENV)
                .prefix(&ns.soap_enc, XMLNS_SOAP_ENC)
                .prefix(&ns.xsd, XMLNS_XSD)
                .prefix(&ns.xsi, XMLNS_XSI)
                .prefix(&ns.cwmp, &ns.cwmp_urn)
                .contents(|writer| {
                    writer
                        .element_ns((XMLNS_SOAP_ENV, "Header"))
                        .contents(|writer| {
                            if let Some(ref id) = self.id {
                                writer
                                    .element_ns((ns.cwmp_urn.as_str(), "ID"))
                                    .attr_ns((XMLNS_SOAP_ENV, "mustUnderstand"), "1")
                                    .text(id)?;
                            }
                            Ok(())
                        })?;
                    writer
                        .element_ns((XMLNS_SOAP_ENV, "Body"))
                        .contents(|writer| encode_body(writer, ns, &self.body))
                })
        })?;

        Ok(out)
    }
}

fn encode_body<W: Write>(
    writer: &mut XmlWriter<W>,
    ns: &SoapNamespace,
    body: &Body,
) -> Result<(), WriterError> {
    let cwmp = ns.cwmp_urn.as_str();

    match body {
        Body::Fault(fault) => writer
            .element_ns((XMLNS_SOAP_ENV, "Fault"))
            .contents(|writer| {
                writer.element("faultcode").text(&fault.fault_code)?;
                writer.element("faultstring").text(&fault.fault_string)?;
                writer.element("detail").contents(|writer| {
                    writer.element_ns((cwmp, "Fault")).contents(|writer| {
                        writer.element("FaultCode").text(&fault.detail.fault_code)?;
                        writer
                            .element("FaultString")
                            .text(&fault.detail.fault_string)?;
                        for entry in &fault.detail.set_parameter_values_faults {
                            writer.element("SetParameterValuesFault").contents(|writer| {
                                writer.element("ParameterName").text(&entry.parameter_name)?;
                                writer.element("FaultCode").text(entry.fault_code)?;
                                writer.element("FaultString").text(&entry.fault_string)
                            })?;
                        }
                        Ok(())
                    })
                })
            }),

        Body::Inform(msg) => writer.element_ns((cwmp, "Inform")).contents(|writer| {
            writer.element("DeviceId").contents(|writer| {
                writer
                    .element("Manufacturer")
                    .text(&msg.device_id.manufacturer)?;
                writer.element("OUI").text(&msg.device_id.oui)?;
                writer
                    .element("ProductClass")
                    .text(&msg.device_id.product_class)?;
                writer
                    .element("SerialNumber")
                    .text(&msg.device_id.serial_number)
            })?;
            writer.element("Event").contents(|writer| {
                for event in &msg.events {
                    writer.element("EventStruct").contents(|writer| {
                        writer.element("EventCode").text(&event.event_code)?;
                        writer.element("CommandKey").text(&event.command_key)
                    })?;
                }
                Ok(())
            })?;
            writer.element("MaxEnvelopes").text(msg.max_envelopes)?;
            writer.element("CurrentTime").text(&msg.current_time)?;
            writer.element("RetryCount").text(msg.retry_count)?;
            parameter_value_list(writer, ns, &msg.parameter_list, false)
        }),
        Body::InformResponse(msg) => writer
            .element_ns((cwmp, "InformResponse"))
            .contents(|writer| writer.element("MaxEnvelopes").text(msg.max_envelopes)),

        Body::TransferComplete(msg) => writer
            .element_ns((cwmp, "TransferComplete"))
            .contents(|writer| {
                writer.element("CommandKey").text(&msg.command_key)?;
                fault_struct(writer, &msg.fault)?;
                writer.element("StartTime").text(&msg.start_time)?;
                writer.element("CompleteTime").text(&msg.complete_time)
            }),
        Body::TransferCompleteResponse(_) => writer
            .element_ns((cwmp, "TransferCompleteResponse"))
            .empty(),
        Body::AutonomousTransferComplete(msg) => writer
            .element_ns((cwmp, "AutonomousTransferComplete"))
            .contents(|writer| {
                writer.element("AnnounceURL").text(&msg.announce_url)?;
                writer.element("TransferURL").text(&msg.transfer_url)?;
                writer.element("IsDownload").text(msg.is_download)?;
                writer.element("FileType").text(&msg.file_type)?;
                writer.element("FileSize").text(msg.file_size)?;
                writer
                    .element("TargetFileName")
                    .text(&msg.target_file_name)?;
                fault_struct(writer, &msg.fault)?;
                writer.element("StartTime").text(&msg.start_time)?;
                writer.element("CompleteTime").text(&msg.complete_time)
            }),
        Body::AutonomousTransferCompleteResponse(_) => writer
            .element_ns((cwmp, "AutonomousTransferCompleteResponse"))
            .empty(),

        Body::GetRpcMethods(_) => writer.element_ns((cwmp, "GetRPCMethods")).empty(),
        Body::GetRpcMethodsResponse(msg) => writer
            .element_ns((cwmp, "GetRPCMethodsResponse"))
            .contents(|writer| string_array(writer, ns, "MethodList", &msg.method_list)),

        Body::SetParameterValues(msg) => writer
            .element_ns((cwmp, "SetParameterValues"))
            .contents(|writer| {
                parameter_value_list(writer, ns, &msg.parameter_list, true)?;
                writer.element("ParameterKey").text(&msg.parameter_key)
            }),
        Body::SetParameterValuesResponse(msg) => writer
            .element_ns((cwmp, "SetParameterValuesResponse"))
            .contents(|writer| writer.element("status").text(msg.status)),

        Body::GetParameterValues(msg) => writer
            .element_ns((cwmp, "GetParameterValues"))
            .contents(|writer| string_array(writer, ns, "ParameterNames", &msg.parameter_names)),
        Body::GetParameterValuesResponse(msg) => writer
            .element_ns((cwmp, "GetParameterValuesResponse"))
            .contents(|writer| parameter_value_list(writer, ns, &msg.parameter_list, false)),

        Body::GetParameterNames(msg) => writer
            .element_ns((cwmp, "GetParameterNames"))
            .contents(|writer| {
                writer.element("ParameterPath").text(&msg.parameter_path)?;
                writer.element("NextLevel").text(&msg.next_level)
            }),
        Body::GetParameterNamesResponse(msg) => writer
            .element_ns((cwmp, "GetParameterNamesResponse"))
            .contents(|writer| parameter_info_list(writer, ns, &msg.parameter_list)),

        Body::SetParameterAttributes(msg) => writer
            .element_ns((cwmp, "SetParameterAttributes"))
            .contents(|writer| set_parameter_attributes_list(writer, ns, &msg.parameter_list)),
        Body::SetParameterAttributesResponse(_) => writer
            .element_ns((cwmp, "SetParameterAttributesResponse"))
            .empty(),

        Body::GetParameterAttributes(msg) => writer
            .element_ns((cwmp, "GetParameterAttributes"))
            .contents(|writer| string_array(writer, ns, "ParameterNames", &msg.parameter_names)),
        Body::GetParameterAttributesResponse(msg) => writer
            .element_ns((cwmp, "GetParameterAttributesResponse"))
            .contents(|writer| parameter_attributes_list(writer, ns, &msg.parameter_list)),

        Body::AddObject(msg) => writer.element_ns((cwmp, "AddObject")).contents(|writer| {
            writer.element("ObjectName").text(&msg.object_name)?;
            writer.element("ParameterKey").text(&msg.parameter_key)
        }),
        Body::AddObjectResponse(msg) => writer
            .element_ns((cwmp, "AddObjectResponse"))
            .contents(|writer| {
                writer.element("InstanceNumber").text(msg.instance_number)?;
                writer.element("status").text(msg.status)
            }),

        Body::DeleteObject(msg) => writer.element_ns((cwmp, "DeleteObject")).contents(|writer| {
            writer.element("ObjectName").text(&msg.object_name)?;
            writer.element("ParameterKey").text(&msg.parameter_key)
        }),
        Body::DeleteObjectResponse(msg) => writer
            .element_ns((cwmp, "DeleteObjectResponse"))
            .contents(|writer| writer.element("status").text(msg.status)),

        Body::Download(msg) => writer.element_ns((cwmp, "Download")).contents(|writer| {
            writer.element("CommandKey").text(&msg.command_key)?;
            writer.element("FileType").text(&msg.file_type)?;
            writer.element("URL").text(&msg.url)?;
            writer.element("Username").text(&msg.username)?;
            writer.element("Password").text(&msg.password)?;
            writer.element("FileSize").text(msg.file_size)?;
            writer
                .element("TargetFileName")
                .text(&msg.target_file_name)?;
            writer.element("DelaySeconds").text(msg.delay_seconds)?;
            writer.element("SuccessURL").text(&msg.success_url)?;
            writer.element("FailureURL").text(&msg.failure_url)
        }),
        Body::DownloadResponse(msg) => writer
            .element_ns((cwmp, "DownloadResponse"))
            .contents(|writer| {
                writer.element("status").text(msg.status)?;
                writer.element("StartTime").text(&msg.start_time)?;
                writer.element("CompleteTime").text(&msg.complete_time)
            }),

        Body::Upload(msg) => writer.element_ns((cwmp, "Upload")).contents(|writer| {
            writer.element("CommandKey").text(&msg.command_key)?;
            writer.element("FileType").text(&msg.file_type)?;
            writer.element("URL").text(&msg.url)?;
            writer.element("Username").text(&msg.username)?;
            writer.element("Password").text(&msg.password)?;
            writer.element("DelaySeconds").text(msg.delay_seconds)
        }),
        Body::UploadResponse(msg) => writer
            .element_ns((cwmp, "UploadResponse"))
            .contents(|writer| {
                writer.element("status").text(msg.status)?;
                writer.element("StartTime").text(&msg.start_time)?;
                writer.element("CompleteTime").text(&msg.complete_time)
            }),

        Body::Reboot(msg) => writer
            .element_ns((cwmp, "Reboot"))
            .contents(|writer| writer.element("CommandKey").text(&msg.command_key)),
        Body::RebootResponse(_) => writer.element_ns((cwmp, "RebootResponse")).empty(),

        Body::FactoryReset(_) => writer.element_ns((cwmp, "FactoryReset")).empty(),
        Body::FactoryResetResponse(_) => {
            writer.element_ns((cwmp, "FactoryResetResponse")).empty()
        }
    }
}

fn fault_struct<W: Write>(
    writer: &mut XmlWriter<W>,
    fault: &FaultStruct,
) -> Result<(), WriterError> {
    writer.element("FaultStruct").contents(|writer| {
        writer.element("FaultCode").text(fault.fault_code)?;
        writer.element("FaultString").text(&fault.fault_string)
    })
}

/// Writes a SOAP-ENC array of `<string>` entries with the mandatory
/// `arrayType` attribute reflecting the runtime element count.
fn string_array<W: Write>(
    writer: &mut XmlWriter<W>,
    ns: &SoapNamespace,
    name: &str,
    items: &[String],
) -> Result<(), WriterError> {
    writer
        .element(name)
        .attr_ns(
            (XMLNS_SOAP_ENC, "arrayType"),
            format!("{}:string[{}]", ns.xsd, items.len()),
        )
        .contents(|writer| {
            for item in items {
                writer.element("string").text(item)?;
            }
            Ok(())
        })
}

/// Writes a `ParameterList` of `ParameterValueStruct` entries. When
/// `typed` is set (SetParameterValues), every Name carries
/// `xsi:type="xsd:string"` and every Value its data-model-resolved type;
/// otherwise a Value is typed only when a type is recorded on it.
fn parameter_value_list<W: Write>(
    writer: &mut XmlWriter<W>,
    ns: &SoapNamespace,
    items: &[ParameterValue],
    typed: bool,
) -> Result<(), WriterError> {
    writer
        .element("ParameterList")
        .attr_ns(
            (XMLNS_SOAP_ENC, "arrayType"),
            format!("{}:ParameterValueStruct[{}]", ns.cwmp, items.len()),
        )
        .contents(|writer| {
            for item in items {
                writer.element("ParameterValueStruct").contents(|writer| {
                    let name = writer.element("Name");
                    let name = if typed {
                        name.attr_ns((XMLNS_XSI, "type"), format!("{}:string", ns.xsd))
                    } else {
                        name
                    };
                    name.text(&item.name)?;

                    let value = writer.element("Value");
                    let value = match (typed, &item.xsi_type) {
                        (true, xsi_type) => value.attr_ns(
                            (XMLNS_XSI, "type"),
                            format!("{}:{}", ns.xsd, xsi_type.as_deref().unwrap_or("string")),
                        ),
                        (false, Some(xsi_type)) => value
                            .attr_ns((XMLNS_XSI, "type"), format!("{}:{xsi_type}", ns.xsd)),
                        (false, None) => value,
                    };
                    value.text(&item.value)
                })?;
            }
            Ok(())
        })
}

fn parameter_info_list<W: Write>(
    writer: &mut XmlWriter<W>,
    ns: &SoapNamespace,
    items: &[ParameterInfo],
) -> Result<(), WriterError> {
    writer
        .element("ParameterList")
        .attr_ns(
            (XMLNS_SOAP_ENC, "arrayType"),
            format!("{}:ParameterInfoStruct[{}]", ns.cwmp, items.len()),
        )
        .contents(|writer| {
            for item in items {
                writer.element("ParameterInfoStruct").contents(|writer| {
                    writer.element("Name").text(&item.name)?;
                    writer.element("Writable").text(&item.writable)
                })?;
            }
            Ok(())
        })
}

fn set_parameter_attributes_list<W: Write>(
    writer: &mut XmlWriter<W>,
    ns: &SoapNamespace,
    items: &[SetParameterAttributesStruct],
) -> Result<(), WriterError> {
    writer
        .element("ParameterList")
        .attr_ns(
            (XMLNS_SOAP_ENC, "arrayType"),
            format!("{}:SetParameterAttributesStruct[{}]", ns.cwmp, items.len()),
        )
        .contents(|writer| {
            for item in items {
                writer
                    .element("SetParameterAttributesStruct")
                    .contents(|writer| {
                        writer.element("Name").text(&item.name)?;
                        if item.notification_change {
                            writer
                                .element("NotificationChange")
                                .text(item.notification_change)?;
                        }
                        if item.notification_change || item.notification != 0 {
                            writer.element("Notification").text(item.notification)?;
                        }
                        if item.access_list_change {
                            writer
                                .element("AccessListChange")
                                .text(item.access_list_change)?;
                        }
                        string_array(writer, ns, "AccessList", &item.access_list)?;
                        Ok(())
                    })?;
            }
            Ok(())
        })
}

fn parameter_attributes_list<W: Write>(
    writer: &mut XmlWriter<W>,
    ns: &SoapNamespace,
    items: &[ParameterAttributes],
) -> Result<(), WriterError> {
    writer
        .element("ParameterList")
        .attr_ns(
            (XMLNS_SOAP_ENC, "arrayType"),
            format!("{}:ParameterAttributesStruct[{}]", ns.cwmp, items.len()),
        )
        .contents(|writer| {
            for item in items {
                writer
                    .element("ParameterAttributesStruct")
                    .contents(|writer| {
                        writer.element("Name").text(&item.name)?;
                        writer.element("Notification").text(item.notification)?;
                        string_array(writer, ns, "AccessList", &item.access_list)
                    })?;
            }
            Ok(())
        })
}
