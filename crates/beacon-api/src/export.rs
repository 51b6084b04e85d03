//! `/api/v1/export_raw_data`

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use futures::stream;
use http_body::Frame;
use http_body_util::StreamBody;
use std::convert::Infallible;
use tracing::info;

use beacon_common::{Error, Result};
use beacon_export::{response_headers, ExportFormat, ExportRequest, ExportStream};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Trailer name as sent on the wire
const COMPLETE_TRAILER: HeaderName = HeaderName::from_static("x-response-complete");

type Params = Vec<(String, String)>;

fn param<'a>(params: &'a Params, name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

pub async fn export_get(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<Params>,
) -> std::result::Result<Response, ApiError> {
    let org_id = user.org(param(&params, "org_id"))?;
    let format = ExportFormat::parse(param(&params, "format"))?;
    let request = ExportRequest::from_query_pairs(&params, &state.config.export)?;
    Ok(start_export(&state, org_id, format, request)?)
}

pub async fn export_post(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<Params>,
    body: Bytes,
) -> std::result::Result<Response, ApiError> {
    let org_id = user.org(param(&params, "org_id"))?;
    let format = ExportFormat::parse(param(&params, "format"))?;
    let request = ExportRequest::from_json(&body, &state.config.export)?;
    Ok(start_export(&state, org_id, format, request)?)
}

/// Commit the headers and stream the body, ending with the completeness trailer.
///
/// hyper drops the trailer frame on HTTP/1.1 unless the request sent
/// `TE: trailers`.
fn start_export(state: &AppState, org_id: String, format: ExportFormat, request: ExportRequest) -> Result<Response> {
    info!(
        org_id = %org_id,
        signal = request.signal.as_str(),
        format = format.as_str(),
        limit = request.limit,
        "starting raw data export"
    );

    let mut headers = HeaderMap::new();
    for (name, value) in response_headers(format, chrono::Utc::now()) {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Internal(format!("invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| Error::Internal(format!("invalid header value: {}", e)))?;
        headers.insert(name, value);
    }

    let session = state.exporter.export(&state.shutdown, org_id, request);
    let export = ExportStream::new(session, format, state.config.export.max_bytes);
    let frames = stream::unfold(Some(export), |export| async move {
        let mut export = export?;
        match export.next_chunk().await {
            Some(chunk) => Some((Ok::<_, Infallible>(Frame::data(chunk)), Some(export))),
            None => {
                let complete = export.take_outcome().map_or(false, |outcome| outcome.complete);
                let mut trailers = HeaderMap::new();
                trailers.insert(
                    COMPLETE_TRAILER,
                    HeaderValue::from_static(if complete { "true" } else { "false" }),
                );
                Some((Ok(Frame::trailers(trailers)), None))
            }
        }
    });

    let mut response = Response::new(Body::new(StreamBody::new(frames)));
    *response.status_mut() = StatusCode::OK;
    *response.headers_mut() = headers;
    Ok(response)
}
