use std::sync::Arc;

use actix_web::{
    HttpRequest, HttpResponse,
    cookie::Cookie,
    http::header,
    web::{Bytes, Data},
};
use cwmp::{Body, Envelope, InformResponse, fault};
use tracing::{debug, error, warn};

use crate::{AcsServer, Device, session::SessionData};

/// `POST /acs`: one turn of the CWMP session state machine.
///
/// An Inform (re)binds the session and is answered directly. Every other
/// payload requires a bound session: the message is dispatched by body
/// tag, then the next queued method call for the device is delivered, or
/// 204 when there is no pending work.
pub(crate) async fn handle_post(
    req: HttpRequest,
    body: Bytes,
    server: Data<AcsServer>,
) -> HttpResponse {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("text/xml")
        .to_owned();

    let envelope = if body.is_empty() {
        None
    } else {
        match Envelope::decode(&body) {
            Ok(envelope) => Some(envelope),
            Err(error) => {
                warn!(%error, "decode CWMP envelope");
                return HttpResponse::BadRequest().body(error.to_string());
            }
        }
    };

    if let Some(envelope) = &envelope {
        if let Body::Inform(inform) = &envelope.body {
            return handle_inform_post(&req, &server, envelope, inform, &content_type).await;
        }
    }

    // Anything but an Inform needs the session a previous Inform bound.
    let Some(session) = server.sessions().get(&req).await else {
        debug!("no session bound");
        return if envelope.is_some() {
            HttpResponse::Ok().finish()
        } else {
            HttpResponse::NoContent().finish()
        };
    };
    let Some(ns) = session.namespace() else {
        return HttpResponse::Ok().finish();
    };

    let inbound_id = envelope
        .as_ref()
        .and_then(|envelope| envelope.id.clone())
        .unwrap_or_default();

    let device = match device_for_session(&server, &session).await {
        Some(device) => device,
        None => {
            error!(
                oui = session.oui,
                serial_number = session.serial_number,
                "no device for bound session"
            );
            let reply = Envelope::fault(
                inbound_id,
                ns,
                fault::INTERNAL_ERROR,
                &crate::Error::InvalidSession.to_string(),
            );
            return soap_response(reply, &session.content_type, None);
        }
    };

    if let Some(envelope) = &envelope {
        match dispatch(&server, &device, envelope).await {
            Dispatch::Reply(body) => {
                let reply = Envelope::new(inbound_id, envelope.ns.clone(), body);
                return soap_response(reply, &session.content_type, None);
            }
            Dispatch::Fault(error) => {
                error!(%error, body = envelope.body.name(), "handle CWMP message");
                let reply = Envelope::fault(
                    inbound_id,
                    envelope.ns.clone(),
                    fault::INTERNAL_ERROR,
                    &error.to_string(),
                );
                return soap_response(reply, &session.content_type, None);
            }
            Dispatch::Continue => {}
        }
    }

    match server.next_message(&ns, &device).await {
        Some(reply) => soap_response(reply, &session.content_type, None),
        None => HttpResponse::NoContent().finish(),
    }
}

async fn handle_inform_post(
    req: &HttpRequest,
    server: &AcsServer,
    envelope: &Envelope,
    inform: &cwmp::Inform,
    content_type: &str,
) -> HttpResponse {
    let inbound_id = envelope.id.clone().unwrap_or_default();

    if let Err(error) = server.handle_inform(inform).await {
        error!(%error, "handle Inform");
        let reply = Envelope::fault(
            inbound_id,
            envelope.ns.clone(),
            fault::INTERNAL_ERROR,
            &error.to_string(),
        );
        return soap_response(reply, content_type, None);
    }

    let cookie = server
        .sessions()
        .bind(
            req,
            &inform.device_id.oui,
            &inform.device_id.product_class,
            &inform.device_id.serial_number,
            &envelope.ns,
            content_type,
        )
        .await;

    let reply = Envelope::new(
        inbound_id,
        envelope.ns.clone(),
        Body::InformResponse(InformResponse { max_envelopes: 1 }),
    );
    soap_response(reply, content_type, Some(cookie))
}

enum Dispatch {
    /// Answer the CPE request with this body.
    Reply(Body),
    /// A handler failed; answer with a CWMP fault.
    Fault(crate::Error),
    /// Fall through to next-call delivery.
    Continue,
}

async fn dispatch(server: &AcsServer, device: &Arc<dyn Device>, envelope: &Envelope) -> Dispatch {
    let id = envelope.id.as_deref().unwrap_or_default();

    match &envelope.body {
        Body::TransferComplete(msg) => match server.handle_transfer_complete(device, msg).await {
            Ok(()) => Dispatch::Reply(Body::TransferCompleteResponse(Default::default())),
            Err(error) => Dispatch::Fault(error),
        },
        Body::AutonomousTransferComplete(msg) => {
            match server.handle_autonomous_transfer_complete(device, msg).await {
                Ok(()) => {
                    Dispatch::Reply(Body::AutonomousTransferCompleteResponse(Default::default()))
                }
                Err(error) => Dispatch::Fault(error),
            }
        }

        Body::Fault(msg) => {
            server.handle_cwmp_fault(device, id, msg).await;
            Dispatch::Continue
        }

        Body::GetRpcMethodsResponse(msg) => {
            match server.handle_get_rpc_methods_response(device, id, msg).await {
                Ok(()) => Dispatch::Continue,
                Err(error) => Dispatch::Fault(error),
            }
        }
        Body::GetParameterValuesResponse(msg) => {
            match server
                .handle_get_parameter_values_response(device, id, msg)
                .await
            {
                Ok(()) => Dispatch::Continue,
                Err(error) => Dispatch::Fault(error),
            }
        }
        Body::GetParameterNamesResponse(msg) => {
            match server
                .handle_get_parameter_names_response(device, id, msg)
                .await
            {
                Ok(()) => Dispatch::Continue,
                Err(error) => Dispatch::Fault(error),
            }
        }
        Body::GetParameterAttributesResponse(msg) => {
            match server
                .handle_get_parameter_attributes_response(device, id, msg)
                .await
            {
                Ok(()) => Dispatch::Continue,
                Err(error) => Dispatch::Fault(error),
            }
        }

        Body::SetParameterValuesResponse(msg) => {
            debug!(status = msg.status, "SetParameterValuesResponse");
            device.update_method_call_response(id, None, 0, "").await;
            Dispatch::Continue
        }
        Body::SetParameterAttributesResponse(_) => {
            debug!("SetParameterAttributesResponse");
            device.update_method_call_response(id, None, 0, "").await;
            Dispatch::Continue
        }
        Body::AddObjectResponse(msg) => {
            debug!(
                instance_number = msg.instance_number,
                status = msg.status,
                "AddObjectResponse"
            );
            device.update_method_call_response(id, None, 0, "").await;
            Dispatch::Continue
        }
        Body::DeleteObjectResponse(msg) => {
            debug!(status = msg.status, "DeleteObjectResponse");
            device.update_method_call_response(id, None, 0, "").await;
            Dispatch::Continue
        }
        Body::DownloadResponse(msg) => {
            debug!(
                status = msg.status,
                start_time = msg.start_time,
                complete_time = msg.complete_time,
                "DownloadResponse"
            );
            device.update_method_call_response(id, None, 0, "").await;
            Dispatch::Continue
        }
        Body::UploadResponse(msg) => {
            debug!(
                status = msg.status,
                start_time = msg.start_time,
                complete_time = msg.complete_time,
                "UploadResponse"
            );
            device.update_method_call_response(id, None, 0, "").await;
            Dispatch::Continue
        }
        Body::RebootResponse(_) => {
            debug!("RebootResponse");
            device.update_method_call_response(id, None, 0, "").await;
            Dispatch::Continue
        }
        Body::FactoryResetResponse(_) => {
            debug!("FactoryResetResponse");
            device.update_method_call_response(id, None, 0, "").await;
            Dispatch::Continue
        }

        body => {
            // Request-direction messages other than Inform and the
            // transfer reports are not something a CPE sends an ACS.
            warn!(body = body.name(), "unexpected payload from CPE");
            Dispatch::Continue
        }
    }
}

async fn device_for_session(
    server: &AcsServer,
    session: &SessionData,
) -> Option<Arc<dyn Device>> {
    server
        .device_store()
        .get_device(
            server.schema(),
            &session.oui,
            &session.product_class,
            &session.serial_number,
        )
        .await
}

pub(crate) fn soap_response(
    envelope: Envelope,
    content_type: &str,
    cookie: Option<Cookie<'_>>,
) -> HttpResponse {
    match envelope.encode() {
        Ok(body) => {
            let mut builder = HttpResponse::Ok();
            builder.insert_header((header::CONTENT_TYPE, content_type));
            if let Some(cookie) = cookie {
                builder.cookie(cookie);
            }
            builder.body(body)
        }
        Err(error) => {
            error!(%error, "encode CWMP envelope");
            HttpResponse::InternalServerError().finish()
        }
    }
}
