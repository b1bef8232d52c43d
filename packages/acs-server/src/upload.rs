//! `POST|PUT /upload/{name}`: file uploads from CPEs. The filename names
//! the file type and the measurement window; PM files are additionally
//! decoded on a detached task and fed to the performance handler.

use actix_multipart::Multipart;
use actix_web::{
    HttpRequest, HttpResponse,
    http::header,
    web::{self, Bytes, BytesMut, Data},
};
use futures::StreamExt;
use pm::{FileType, MeasCollecFile};
use time::OffsetDateTime;
use tracing::{error, warn};

use crate::AcsServer;

pub(crate) async fn handle_upload(
    req: HttpRequest,
    path: web::Path<String>,
    payload: web::Payload,
    server: Data<AcsServer>,
) -> HttpResponse {
    let name = path.into_inner();
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    let (filename, data) = if content_type.is_empty() || content_type.starts_with("text/plain") {
        match read_payload(payload).await {
            Ok(data) => (name.clone(), data),
            Err(error) => {
                error!(%error, "read upload body");
                return HttpResponse::InternalServerError().body(error.to_string());
            }
        }
    } else if content_type.starts_with("multipart/form-data") {
        match read_file_field(&req, payload).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                return HttpResponse::BadRequest().body("missing form field \"file\"");
            }
            Err(error) => {
                warn!(%error, "read multipart upload");
                return HttpResponse::BadRequest().body(error.to_string());
            }
        }
    } else {
        return HttpResponse::BadRequest().body(format!("invalid content type {content_type}"));
    };

    let parsed = match pm::parse_file_name(&filename) {
        Ok(parsed) => parsed,
        Err(error) => {
            warn!(%error, filename, "invalid upload filename");
            return HttpResponse::BadRequest().body(format!("invalid filename: {error}"));
        }
    };

    let cutoff = OffsetDateTime::now_utc() - server.data_retention();
    if parsed.start_time < cutoff && parsed.end_time < cutoff {
        warn!(filename, "ignoring upload outside the retention window");
        return HttpResponse::Ok().json(());
    }

    let Some(device) = server
        .device_store()
        .get_device(server.schema(), &parsed.oui, "", &parsed.serial_number)
        .await
    else {
        return HttpResponse::BadRequest().body("invalid device");
    };

    if let Err(error) = server
        .object_store()
        .put_object(server.schema(), server.upload_bucket(), &name, &name, data.clone())
        .await
    {
        error!(%error, filename, "store uploaded object");
        return HttpResponse::InternalServerError().body(error.to_string());
    }

    if parsed.file_type == FileType::PmFile {
        // Decode off the request path; the CPE gets its 200 immediately.
        let handler = server.performance_handler();
        tokio::spawn(async move {
            let collec = match MeasCollecFile::decode(data.as_ref()) {
                Ok(collec) => collec,
                Err(error) => {
                    error!(%error, filename, "decode measurement file");
                    return;
                }
            };
            let values = collec.measure_values();
            handler.handle_measure_values(device, &filename, values).await;
        });
    }

    HttpResponse::Ok().json(())
}

async fn read_payload(payload: web::Payload) -> Result<Bytes, actix_web::error::PayloadError> {
    let mut payload = payload.into_inner();
    let mut buffer = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}

/// Pulls the `file` field out of a multipart body, returning its client
/// filename and contents. Other fields are drained and ignored.
async fn read_file_field(
    req: &HttpRequest,
    payload: web::Payload,
) -> Result<Option<(String, Bytes)>, actix_multipart::MultipartError> {
    let mut multipart = Multipart::new(req.headers(), payload.into_inner());

    while let Some(field) = multipart.next().await {
        let mut field = field?;

        if field.name() != Some("file") {
            while let Some(chunk) = field.next().await {
                chunk?;
            }
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|disposition| disposition.get_filename())
            .unwrap_or("upload")
            .to_owned();

        let mut buffer = BytesMut::new();
        while let Some(chunk) = field.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        return Ok(Some((filename, buffer.freeze())));
    }

    Ok(None)
}
