use std::sync::Arc;

use axum::body::Bytes;
use axum::handler::HandlerWithoutStateExt;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use http::{HeaderMap, StatusCode, header::CONTENT_TYPE};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::constants::CONTENT_TYPE_XML_UTF8;
use crate::description::{render_device_description, render_scpd};
use crate::device::Device;
use crate::soap;

/// The fixed URL set: the root description document, plus SCPD / control /
/// event-sub routes for every service in the tree. Anything else is 404.
pub(crate) fn make_router(device: Arc<Device>) -> axum::Router {
    let mut app = axum::Router::new();

    let description_device = device.clone();
    app = app.route(
        &device.device_url,
        get(move || {
            let device = description_device.clone();
            async move { description_response(render_device_description(&device)) }
        }),
    );

    for service in device.all_services() {
        let scpd_service = service.clone();
        app = app.route(
            &service.scpd_url,
            get(move || {
                let service = scpd_service.clone();
                async move { description_response(render_scpd(&service)) }
            }),
        );

        let control_service = service.clone();
        app = app.route(
            &service.control_url,
            post(move |headers: HeaderMap, body: Bytes| {
                let service = control_service.clone();
                async move { soap::http_handler(service, headers, body).await }
            }),
        );

        // SUBSCRIBE is not a standard method the router can match on, so the
        // eventing stub answers every method on the event-sub URL.
        app = app.route_service(
            &service.event_sub_url,
            soap::subscribe_handler.into_service(),
        );
    }

    app.layer(TraceLayer::new_for_http())
}

fn description_response(xml: anyhow::Result<String>) -> axum::response::Response {
    match xml {
        Ok(xml) => ([(CONTENT_TYPE, CONTENT_TYPE_XML_UTF8)], xml).into_response(),
        Err(e) => {
            warn!("error rendering description: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
