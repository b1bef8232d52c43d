use std::{collections::HashMap, sync::Arc, time::Duration};

use actix_web::{
    App,
    body::MessageBody,
    cookie::Cookie,
    dev::{Service, ServiceResponse},
    http::header,
    test,
};
use async_trait::async_trait;
use cwmp::{
    Body, CwmpFault, DeviceId, Envelope, EventStruct, Fault, GetRpcMethodsResponse, Inform,
    ParameterValue, SetParameterValuesFault, SoapNamespace,
};
use time::macros::datetime;
use tokio::sync::mpsc;

use acs_server::{
    AcsServer, CallState, Device, PerformanceHandler,
    memory::{MemoryObjectStore, MemoryStore},
};

struct RecordingHandler {
    tx: mpsc::UnboundedSender<(String, HashMap<String, f64>)>,
}

#[async_trait]
impl PerformanceHandler for RecordingHandler {
    async fn handle_measure_values(
        &self,
        _device: Arc<dyn Device>,
        filename: &str,
        values: HashMap<String, f64>,
    ) {
        let _ = self.tx.send((filename.to_owned(), values));
    }
}

struct Harness {
    acs: AcsServer,
    store: Arc<MemoryStore>,
    objects: Arc<MemoryObjectStore>,
    measurements: mpsc::UnboundedReceiver<(String, HashMap<String, f64>)>,
}

fn harness() -> Harness {
    let store = MemoryStore::new();
    store.add_product("", "000000", "enb");
    let objects = MemoryObjectStore::new();
    let (tx, measurements) = mpsc::unbounded_channel();

    let acs = AcsServer::builder(
        store.clone(),
        store.clone(),
        Arc::new(RecordingHandler { tx }),
        objects.clone(),
    )
    // Uploads in the fixtures date from 2023; keep them in-window.
    .data_retention(Duration::from_secs(20 * 365 * 24 * 3600))
    .build()
    .unwrap();

    Harness {
        acs,
        store,
        objects,
        measurements,
    }
}

fn inform(events: &[&str], serial_number: &str, parameters: &[(&str, &str)]) -> Envelope {
    Envelope::new(
        "100",
        SoapNamespace::default(),
        Body::Inform(Inform {
            device_id: DeviceId {
                manufacturer: "Acme".into(),
                oui: "000000".into(),
                product_class: "enb".into(),
                serial_number: serial_number.into(),
            },
            events: events
                .iter()
                .map(|code| EventStruct {
                    event_code: (*code).to_owned(),
                    command_key: String::new(),
                })
                .collect(),
            max_envelopes: 1,
            current_time: "2023-06-27T20:15:00".into(),
            retry_count: 0,
            parameter_list: parameters
                .iter()
                .map(|(name, value)| ParameterValue::new(*name, *value))
                .collect(),
        }),
    )
}

async fn post_envelope<S, B>(
    app: &S,
    envelope: &Envelope,
    cookie: Option<&Cookie<'static>>,
) -> ServiceResponse<B>
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let mut req = test::TestRequest::post()
        .uri("/acs")
        .insert_header((header::CONTENT_TYPE, "text/xml"))
        .set_payload(envelope.encode().unwrap());
    if let Some(cookie) = cookie {
        req = req.cookie(cookie.clone());
    }
    test::call_service(app, req.to_request()).await
}

async fn post_empty<S, B>(app: &S, cookie: &Cookie<'static>) -> ServiceResponse<B>
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let req = test::TestRequest::post()
        .uri("/acs")
        .insert_header((header::CONTENT_TYPE, "text/xml"))
        .cookie(cookie.clone())
        .to_request();
    test::call_service(app, req).await
}

fn session_cookie<B>(response: &ServiceResponse<B>) -> Cookie<'static> {
    response
        .response()
        .cookies()
        .find(|cookie| cookie.name() == "session")
        .expect("session cookie set")
        .into_owned()
}

async fn decode_body<B: MessageBody>(response: ServiceResponse<B>) -> Envelope {
    let body = test::read_body(response).await;
    Envelope::decode(&body).expect("valid SOAP reply")
}

#[actix_web::test]
async fn bootstrap_flow() {
    let mut h = harness();
    let app = test::init_service(App::new().service(h.acs.service())).await;

    // The bootstrap Inform creates the device and binds the session.
    let response = post_envelope(&app, &inform(&["0 BOOTSTRAP"], "SN1", &[]), None).await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/xml"
    );
    let cookie = session_cookie(&response);
    assert_eq!(cookie.path(), Some("/acs"));
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(
        cookie.max_age(),
        Some(actix_web::cookie::time::Duration::seconds(1800))
    );

    let reply = decode_body(response).await;
    assert_eq!(reply.id.as_deref(), Some("100"));
    let Body::InformResponse(inform_response) = reply.body else {
        panic!("expected InformResponse, got {}", reply.body.name());
    };
    assert_eq!(inform_response.max_envelopes, 1);

    let device = h.store.memory_device("000000", "enb", "SN1").expect("device created");

    // The first synthetic call on a new device is GetRPCMethods.
    let response = post_empty(&app, &cookie).await;
    assert_eq!(response.status(), 200);
    let request = decode_body(response).await;
    assert!(matches!(request.body, Body::GetRpcMethods(_)));
    let command_key = request.id.clone().unwrap();

    // An empty method list falls back to the standard eleven methods.
    let reply = Envelope::new(
        command_key,
        SoapNamespace::default(),
        Body::GetRpcMethodsResponse(GetRpcMethodsResponse {
            method_list: Vec::new(),
        }),
    );
    let response = post_envelope(&app, &reply, Some(&cookie)).await;
    assert_eq!(response.status(), 200);

    let methods = device.supported_methods();
    assert_eq!(methods.len(), 11);
    for method in [
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
    ] {
        assert!(methods.iter().any(|m| m == method), "missing {method}");
    }

    // The bootstrap event also queued a full GetParameterNames, delivered
    // in the same response cycle.
    let request = decode_body(response).await;
    let Body::GetParameterNames(names) = request.body else {
        panic!("expected GetParameterNames, got {}", request.body.name());
    };
    assert_eq!(names.parameter_path, "Device.");
    assert_eq!(names.next_level, "false");

    // The Inform was not periodic-only, so an event record exists.
    assert!(device.events().iter().any(|e| e.event_type == "Inform"));
}

#[actix_web::test]
async fn periodic_only_inform_writes_no_event_record() {
    let h = harness();
    let app = test::init_service(App::new().service(h.acs.service())).await;

    let response = post_envelope(&app, &inform(&["2 PERIODIC"], "SN2", &[]), None).await;
    assert_eq!(response.status(), 200);

    let device = h.store.memory_device("000000", "enb", "SN2").unwrap();
    assert!(device.events().iter().all(|e| e.event_type != "Inform"));

    // No boot event, so no GetParameterNames was queued; only the initial
    // GetRPCMethods of a fresh device is pending.
    let queued = device.queued_calls();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].method_name, "GetRPCMethods");
}

#[actix_web::test]
async fn unknown_product_informs_are_faulted() {
    let h = harness();
    let app = test::init_service(App::new().service(h.acs.service())).await;

    let mut envelope = inform(&["1 BOOT"], "SN3", &[]);
    if let Body::Inform(inform) = &mut envelope.body {
        inform.device_id.oui = "999999".into();
    }
    let response = post_envelope(&app, &envelope, None).await;
    assert_eq!(response.status(), 200);

    let reply = decode_body(response).await;
    let Body::Fault(fault) = reply.body else {
        panic!("expected Fault, got {}", reply.body.name());
    };
    assert_eq!(fault.fault_code, "8002");
}

#[actix_web::test]
async fn posts_without_a_session_get_an_empty_reply() {
    let h = harness();
    let app = test::init_service(App::new().service(h.acs.service())).await;

    let reply = Envelope::new(
        "1",
        SoapNamespace::default(),
        Body::GetRpcMethodsResponse(GetRpcMethodsResponse::default()),
    );
    let response = post_envelope(&app, &reply, None).await;
    assert_eq!(response.status(), 200);
    let body = test::read_body(response).await;
    assert!(body.is_empty());
}

#[actix_web::test]
async fn malformed_xml_is_a_bad_request() {
    let h = harness();
    let app = test::init_service(App::new().service(h.acs.service())).await;

    let req = test::TestRequest::post()
        .uri("/acs")
        .insert_header((header::CONTENT_TYPE, "text/xml"))
        .set_payload("<not xml")
        .to_request();
    let response = test::call_service(&app, req).await;
    assert_eq!(response.status(), 400);
}

async fn bootstrap_device<S, B>(h: &Harness, app: &S, serial_number: &str) -> Cookie<'static>
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let response = post_envelope(app, &inform(&["2 PERIODIC"], serial_number, &[]), None).await;
    assert_eq!(response.status(), 200);
    let cookie = session_cookie(&response);

    // Drain the initial GetRPCMethods so tests start with an empty queue.
    let response = post_empty(app, &cookie).await;
    let request = decode_body(response).await;
    let reply = Envelope::new(
        request.id.unwrap(),
        SoapNamespace::default(),
        Body::GetRpcMethodsResponse(GetRpcMethodsResponse {
            method_list: vec!["GetParameterValues".into(), "SetParameterValues".into()],
        }),
    );
    let response = post_envelope(app, &reply, Some(&cookie)).await;
    assert_eq!(response.status(), 204);

    let device = h.store.memory_device("000000", "enb", serial_number).unwrap();
    assert!(device.queued_calls().is_empty());
    cookie
}

#[actix_web::test]
async fn queued_calls_are_delivered_in_fifo_order() {
    let h = harness();
    let app = test::init_service(App::new().service(h.acs.service())).await;
    let cookie = bootstrap_device(&h, &app, "SN4").await;
    let device = h.store.memory_device("000000", "enb", "SN4").unwrap();

    let now = time::OffsetDateTime::now_utc();
    device.push_method_call(now, "Reboot", None).await.unwrap();
    device
        .push_method_call(now, "FactoryReset", None)
        .await
        .unwrap();
    device
        .push_method_call(now, "GetRPCMethods", None)
        .await
        .unwrap();

    let response = post_empty(&app, &cookie).await;
    let first = decode_body(response).await;
    assert!(matches!(first.body, Body::Reboot(_)));

    // At most one call is in flight: an empty POST mid-exchange delivers
    // nothing new.
    let response = post_empty(&app, &cookie).await;
    assert_eq!(response.status(), 204);

    let reply = Envelope::new(
        first.id.unwrap(),
        SoapNamespace::default(),
        Body::RebootResponse(Default::default()),
    );
    let response = post_envelope(&app, &reply, Some(&cookie)).await;
    let second = decode_body(response).await;
    assert!(matches!(second.body, Body::FactoryReset(_)));

    let reply = Envelope::new(
        second.id.unwrap(),
        SoapNamespace::default(),
        Body::FactoryResetResponse(Default::default()),
    );
    let response = post_envelope(&app, &reply, Some(&cookie)).await;
    let third = decode_body(response).await;
    assert!(matches!(third.body, Body::GetRpcMethods(_)));
}

#[actix_web::test]
async fn unknown_methods_are_skipped() {
    let h = harness();
    let app = test::init_service(App::new().service(h.acs.service())).await;
    let cookie = bootstrap_device(&h, &app, "SN5").await;
    let device = h.store.memory_device("000000", "enb", "SN5").unwrap();

    let now = time::OffsetDateTime::now_utc();
    device
        .push_method_call(now, "ScheduleInform", None)
        .await
        .unwrap();
    device.push_method_call(now, "Reboot", None).await.unwrap();

    let response = post_empty(&app, &cookie).await;
    let request = decode_body(response).await;
    assert!(matches!(request.body, Body::Reboot(_)));

    assert!(
        device
            .call_history()
            .iter()
            .any(|call| call.method_name == "ScheduleInform" && call.state == CallState::Unknown)
    );
}

#[actix_web::test]
async fn set_parameter_values_resolves_types_from_the_data_model() {
    let h = harness();
    let app = test::init_service(App::new().service(h.acs.service())).await;
    let cookie = bootstrap_device(&h, &app, "SN6").await;
    let device = h.store.memory_device("000000", "enb", "SN6").unwrap();

    let mut values = acs_server::Values::new();
    values.insert("Device.WiFi.SSID".to_owned(), "x".to_owned());
    device
        .push_method_call(
            time::OffsetDateTime::now_utc(),
            "SetParameterValues",
            Some(values),
        )
        .await
        .unwrap();

    let response = post_empty(&app, &cookie).await;
    assert_eq!(response.status(), 200);
    let body = test::read_body(response).await;
    let xml = String::from_utf8(body.to_vec()).unwrap();

    // The value carries its resolved type and the list its runtime
    // element count.
    assert!(xml.contains("SOAP-ENC:arrayType=\"cwmp:ParameterValueStruct[1]\""));
    assert!(xml.contains("xsi:type=\"xsd:string\""));
    assert!(xml.contains("<Name xsi:type=\"xsd:string\">Device.WiFi.SSID</Name>"));
}

#[actix_web::test]
async fn device_faults_are_recorded_against_the_pending_call() {
    let h = harness();
    let app = test::init_service(App::new().service(h.acs.service())).await;
    let cookie = bootstrap_device(&h, &app, "SN7").await;
    let device = h.store.memory_device("000000", "enb", "SN7").unwrap();

    let mut values = acs_server::Values::new();
    values.insert("Device.WiFi.SSID".to_owned(), "".to_owned());
    device
        .push_method_call(
            time::OffsetDateTime::now_utc(),
            "SetParameterValues",
            Some(values),
        )
        .await
        .unwrap();

    let response = post_empty(&app, &cookie).await;
    let request = decode_body(response).await;
    let command_key = request.id.unwrap();

    let fault = Envelope::new(
        command_key.clone(),
        SoapNamespace::default(),
        Body::Fault(Fault {
            fault_code: "Client".into(),
            fault_string: "CWMP Fault".into(),
            detail: CwmpFault {
                fault_code: "9003".into(),
                fault_string: "Invalid arguments".into(),
                set_parameter_values_faults: vec![SetParameterValuesFault {
                    parameter_name: "Device.WiFi.SSID".into(),
                    fault_code: 9007,
                    fault_string: "Invalid parameter value".into(),
                }],
            },
        }),
    );
    let response = post_envelope(&app, &fault, Some(&cookie)).await;
    // The fault resolves the exchange and nothing else is queued.
    assert_eq!(response.status(), 204);

    let call = device
        .call_history()
        .into_iter()
        .find(|call| call.command_key == command_key)
        .unwrap();
    assert_eq!(call.state, CallState::Fault);
    assert_eq!(call.fault_code, 9003);
    assert_eq!(call.fault_string, "Invalid arguments");
    assert_eq!(
        call.response_values
            .as_ref()
            .and_then(|values| values.get("Device.WiFi.SSID"))
            .map(String::as_str),
        Some("9007:Invalid parameter value")
    );
}

#[actix_web::test]
async fn autonomous_transfer_complete_inserts_a_log_row() {
    let h = harness();
    let app = test::init_service(App::new().service(h.acs.service())).await;
    let cookie = bootstrap_device(&h, &app, "SN8").await;
    let device = h.store.memory_device("000000", "enb", "SN8").unwrap();

    let envelope = Envelope::new(
        "7",
        SoapNamespace::default(),
        Body::AutonomousTransferComplete(cwmp::AutonomousTransferComplete {
            announce_url: String::new(),
            transfer_url: "http://acs.example/upload/A20230627.2015+0800-2030+0800_000000.SN8.xml"
                .into(),
            is_download: false,
            file_type: "4 Vendor PM File".into(),
            file_size: 100,
            target_file_name: String::new(),
            fault: Default::default(),
            start_time: "2023-06-27T20:15:00".into(),
            complete_time: "2023-06-27T20:30:00".into(),
        }),
    );
    let response = post_envelope(&app, &envelope, Some(&cookie)).await;
    let reply = decode_body(response).await;
    assert!(matches!(reply.body, Body::AutonomousTransferCompleteResponse(_)));

    let ts = datetime!(2023-06-27 12:15:00 UTC).unix_timestamp_nanos() as i64;
    let entry = device.transfer_log(ts).expect("transfer log row");
    assert_eq!(entry.bucket, "acs-upload");
    assert_eq!(entry.file_type, "PmFile");
    assert_eq!(entry.key, "A20230627.2015+0800-2030+0800_000000.SN8.xml");
    assert!(entry.complete_time.is_some());
}

const MEAS_FILE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<measCollecFile>
  <fileHeader fileFormatVersion="32.435 V10.0" vendorName="Acme">
    <fileSender localDn="enb=42"/>
    <measCollec beginTime="2023-06-27T20:15:00+08:00"/>
  </fileHeader>
  <measData>
    <managedElement localDn="enb=42"/>
    <measInfo>
      <job jobId="pm"/>
      <granPeriod duration="PT900S" endTime="2023-06-27T20:30:00+08:00"/>
      <repPeriod duration="PT900S"/>
      <measType p="1">RRC.ConnEstabAtt</measType>
      <measType p="2">RRC.ConnEstabSucc</measType>
      <measValue measObjLdn="cell-1">
        <r p="1">17</r>
        <r p="2">16.5</r>
      </measValue>
    </measInfo>
  </measData>
  <fileFooter>
    <measCollec endTime="2023-06-27T20:30:00+08:00"/>
  </fileFooter>
</measCollecFile>"#;

#[actix_web::test]
async fn pm_upload_is_stored_and_decoded() {
    let mut h = harness();
    let app = test::init_service(App::new().service(h.acs.service())).await;
    bootstrap_device(&h, &app, "SN9").await;

    let name = "A20230627.2015+0800-2030+0800_000000.SN9.xml";
    let req = test::TestRequest::put()
        .uri(&format!("/upload/{name}"))
        .insert_header((header::CONTENT_TYPE, "text/plain"))
        .set_payload(MEAS_FILE)
        .to_request();
    let response = test::call_service(&app, req).await;
    assert_eq!(response.status(), 200);

    let objects = h.objects.objects();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].bucket, "acs-upload");
    assert_eq!(objects[0].key, name);
    assert_eq!(h.objects.object_data(name).unwrap(), MEAS_FILE.as_bytes());

    // Decoding happens on a detached task after the response.
    let (filename, values) =
        tokio::time::timeout(Duration::from_secs(5), h.measurements.recv())
            .await
            .expect("measurement values arrive")
            .expect("channel open");
    assert_eq!(filename, name);
    assert_eq!(values.get("RRC.ConnEstabAtt"), Some(&17.0));
    assert_eq!(values.get("RRC.ConnEstabSucc"), Some(&16.5));
}

#[actix_web::test]
async fn uploads_for_unknown_devices_are_rejected() {
    let h = harness();
    let app = test::init_service(App::new().service(h.acs.service())).await;

    let req = test::TestRequest::put()
        .uri("/upload/A20230627.2015+0800-2030+0800_000000.GHOST.xml")
        .insert_header((header::CONTENT_TYPE, "text/plain"))
        .set_payload(MEAS_FILE)
        .to_request();
    let response = test::call_service(&app, req).await;
    assert_eq!(response.status(), 400);
}

#[actix_web::test]
async fn uploads_with_unknown_names_or_types_are_rejected() {
    let h = harness();
    let app = test::init_service(App::new().service(h.acs.service())).await;
    bootstrap_device(&h, &app, "SN10").await;

    let req = test::TestRequest::put()
        .uri("/upload/report.csv")
        .insert_header((header::CONTENT_TYPE, "text/plain"))
        .set_payload("x")
        .to_request();
    let response = test::call_service(&app, req).await;
    assert_eq!(response.status(), 400);

    let req = test::TestRequest::put()
        .uri("/upload/nrm_000000.SN10.xml")
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .set_payload("{}")
        .to_request();
    let response = test::call_service(&app, req).await;
    assert_eq!(response.status(), 400);
}

#[actix_web::test]
async fn stale_uploads_are_dropped_with_200() {
    let store = MemoryStore::new();
    store.add_product("", "000000", "enb");
    let objects = MemoryObjectStore::new();
    let (tx, measurements) = mpsc::unbounded_channel();
    let acs = AcsServer::builder(
        store.clone(),
        store.clone(),
        Arc::new(RecordingHandler { tx }),
        objects.clone(),
    )
    .data_retention(Duration::from_secs(3600))
    .build()
    .unwrap();
    let h = Harness {
        acs,
        store,
        objects,
        measurements,
    };
    let app = test::init_service(App::new().service(h.acs.service())).await;
    bootstrap_device(&h, &app, "SN11").await;

    let req = test::TestRequest::put()
        .uri("/upload/A20230627.2015+0800-2030+0800_000000.SN11.xml")
        .insert_header((header::CONTENT_TYPE, "text/plain"))
        .set_payload(MEAS_FILE)
        .to_request();
    let response = test::call_service(&app, req).await;
    assert_eq!(response.status(), 200);
    assert!(h.objects.objects().is_empty());
}

#[actix_web::test]
async fn reply_prefixes_mirror_the_inform() {
    let h = harness();
    let app = test::init_service(App::new().service(h.acs.service())).await;

    let mut envelope = inform(&["2 PERIODIC"], "SN12", &[]);
    envelope.ns = SoapNamespace {
        soap_env: "se".into(),
        soap_enc: "enc".into(),
        xsd: "x".into(),
        xsi: "xi".into(),
        cwmp: "c".into(),
        cwmp_urn: cwmp::XMLNS_CWMP_1_2.into(),
    };
    let response = post_envelope(&app, &envelope, None).await;
    assert_eq!(response.status(), 200);

    let body = test::read_body(response).await;
    let xml = String::from_utf8(body.to_vec()).unwrap();
    assert!(xml.contains("<se:Envelope"));
    assert!(xml.contains("xmlns:c=\"urn:dslforum-org:cwmp-1-2\""));
    assert!(xml.contains("<c:InformResponse>"));
}
