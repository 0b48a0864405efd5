use std::sync::Arc;

use axum::body::Bytes;
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, StatusCode, header::CONTENT_TYPE};
use tracing::{debug, trace};

use crate::constants::{
    CONTENT_TYPE_XML_UTF8, NS_SOAP_ENCODING, NS_SOAP_ENVELOPE, NS_UPNP_CONTROL,
};
use crate::error::UpnpError;
use crate::service::{ActionArgs, Direction, Service};

/// Protocol-level request rejections, surfaced as HTTP 400 with a short
/// reason string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BadRequest {
    InvalidSoap,
    InvalidAction,
    InvalidActionArgument,
}

impl BadRequest {
    pub(crate) fn reason(&self) -> &'static str {
        match self {
            BadRequest::InvalidSoap => "InvalidSoap",
            BadRequest::InvalidAction => "InvalidAction",
            BadRequest::InvalidActionArgument => "InvalidActionArgument",
        }
    }
}

/// A parsed control POST: the action named by the SOAPAction header plus the
/// raw textual arguments from the request element.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ActionCall {
    pub action_name: String,
    pub raw_args: Vec<(String, String)>,
}

/// Extract the action call from the SOAPAction header and the request body.
/// The header is `"<service type>#<action>"`; the body must contain
/// `Envelope/Body` with the request element as the first child.
pub(crate) fn parse_action_call(
    soap_action: Option<&str>,
    body: &str,
) -> Result<ActionCall, BadRequest> {
    let header = soap_action.ok_or(BadRequest::InvalidSoap)?;
    let header = header.trim().trim_matches('"');
    let parts: Vec<&str> = header.split('#').collect();
    let action_name = match parts.as_slice() {
        [_, action_name] => (*action_name).to_owned(),
        _ => return Err(BadRequest::InvalidSoap),
    };

    let raw_args = parse_request_element(body)?;
    Ok(ActionCall {
        action_name,
        raw_args,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvelopeState {
    BeforeEnvelope,
    BeforeBody,
    BeforeRequestElement,
}

fn parse_request_element(body: &str) -> Result<Vec<(String, String)>, BadRequest> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(body);
    let mut state = EnvelopeState::BeforeEnvelope;

    let request_element = loop {
        match reader.read_event().map_err(|_| BadRequest::InvalidSoap)? {
            Event::Eof => return Err(BadRequest::InvalidSoap),
            Event::Start(e) => match (state, e.local_name().as_ref()) {
                (EnvelopeState::BeforeEnvelope, b"Envelope") => {
                    state = EnvelopeState::BeforeBody;
                }
                (EnvelopeState::BeforeEnvelope, _) => return Err(BadRequest::InvalidSoap),
                (EnvelopeState::BeforeBody, b"Body") => {
                    state = EnvelopeState::BeforeRequestElement;
                }
                (EnvelopeState::BeforeBody, _) => {
                    // Skip s:Header and the like.
                    reader
                        .read_to_end(e.name())
                        .map_err(|_| BadRequest::InvalidSoap)?;
                }
                (EnvelopeState::BeforeRequestElement, _) => break Some(e),
            },
            Event::Empty(_) if state == EnvelopeState::BeforeRequestElement => break None,
            Event::End(_) if state == EnvelopeState::BeforeRequestElement => {
                // Empty body: no request element.
                return Err(BadRequest::InvalidSoap);
            }
            _ => continue,
        }
    };

    let request_element = match request_element {
        Some(e) => e,
        // An empty request element carries no arguments.
        None => return Ok(Vec::new()),
    };

    let end_name = request_element.name().as_ref().to_vec();
    let mut raw_args = Vec::new();
    loop {
        match reader.read_event().map_err(|_| BadRequest::InvalidSoap)? {
            Event::Eof => return Err(BadRequest::InvalidSoap),
            Event::Start(child) => {
                let name = std::str::from_utf8(child.local_name().as_ref())
                    .map_err(|_| BadRequest::InvalidSoap)?
                    .to_owned();
                let text = reader
                    .read_text(child.to_end().name())
                    .map_err(|_| BadRequest::InvalidSoap)?;
                raw_args.push((name, text.into_owned()));
            }
            Event::Empty(child) => {
                let name = std::str::from_utf8(child.local_name().as_ref())
                    .map_err(|_| BadRequest::InvalidSoap)?
                    .to_owned();
                raw_args.push((name, String::new()));
            }
            Event::End(e) if e.name().as_ref() == end_name.as_slice() => break,
            _ => continue,
        }
    }
    Ok(raw_args)
}

/// Outcome of a control POST, one-to-one with the on-wire shapes.
#[derive(Debug)]
pub(crate) enum SoapResult {
    BadRequest(&'static str),
    Success(String),
    Fault { body: String, code: u16 },
}

pub(crate) async fn dispatch(
    service: &Arc<Service>,
    soap_action: Option<&str>,
    body: &str,
) -> SoapResult {
    let call = match parse_action_call(soap_action, body) {
        Ok(call) => call,
        Err(e) => {
            debug!(reason = e.reason(), "rejecting control request");
            return SoapResult::BadRequest(e.reason());
        }
    };

    let action = match service.action(&call.action_name) {
        Some(action) => action,
        None => {
            debug!(action = %call.action_name, "unknown action");
            return SoapResult::BadRequest(BadRequest::InvalidAction.reason());
        }
    };

    // Coerce arguments through their related state variables.
    let mut args = ActionArgs::default();
    for (name, text) in &call.raw_args {
        let argument = match action.argument(name, Direction::In) {
            Some(argument) => argument,
            None => {
                debug!(action = %call.action_name, argument = %name, "unknown argument");
                return SoapResult::BadRequest(BadRequest::InvalidActionArgument.reason());
            }
        };
        let state_var = match service.state_variable(&argument.related_state_variable) {
            Some(state_var) => state_var,
            None => {
                return fault(&UpnpError::action_failed(format!(
                    "argument {name} has no state variable"
                )));
            }
        };
        match state_var.coerce(text) {
            Ok(value) => args.insert(name.clone(), value),
            Err(e) => return fault(&e),
        }
    }
    for argument in action.in_arguments() {
        if !args.contains(&argument.name) {
            return fault(&UpnpError::invalid_value(
                &argument.name,
                "missing argument",
            ));
        }
    }

    let output = match action.invoke(service.clone(), args).await {
        Ok(output) => output,
        Err(e) => {
            debug!(action = %call.action_name, "action handler failed: {e:#}");
            return fault(&e);
        }
    };

    // Render out-arguments with the types their state variables declare.
    let mut rendered = Vec::new();
    for (name, value) in output.iter() {
        let result = action
            .argument(name, Direction::Out)
            .and_then(|argument| service.state_variable(&argument.related_state_variable))
            .ok_or_else(|| UpnpError::action_failed(format!("unknown out-argument {name}")))
            .and_then(|state_var| state_var.data_type().render(value));
        match result {
            Ok(text) => rendered.push((name.to_owned(), text)),
            Err(e) => return fault(&UpnpError::action_failed(e.to_string())),
        }
    }

    SoapResult::Success(render_success(
        &service.service_type,
        &call.action_name,
        &rendered,
    ))
}

fn fault(error: &UpnpError) -> SoapResult {
    SoapResult::Fault {
        body: render_fault(error),
        code: error.fault_code(),
    }
}

fn render_success(service_type: &str, action_name: &str, args: &[(String, String)]) -> String {
    let mut args_xml = String::new();
    for (name, value) in args {
        let value = quick_xml::escape::escape(value.as_str());
        args_xml.push_str(&format!("<{name}>{value}</{name}>"));
    }
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="{NS_SOAP_ENVELOPE}" s:encodingStyle="{NS_SOAP_ENCODING}"><s:Body><st:{action_name}Response xmlns:st="{service_type}">{args_xml}</st:{action_name}Response></s:Body></s:Envelope>"#
    )
}

pub(crate) fn render_fault(error: &UpnpError) -> String {
    let code = error.fault_code();
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="{NS_SOAP_ENVELOPE}" s:encodingStyle="{NS_SOAP_ENCODING}"><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring><detail><UPnPError xmlns="{NS_UPNP_CONTROL}"><errorCode>{code}</errorCode><errorDescription>Action Failed</errorDescription></UPnPError></detail></s:Fault></s:Body></s:Envelope>"#
    )
}

/// POST handler for a service's control URL.
pub(crate) async fn http_handler(
    service: Arc<Service>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let soap_action = headers.get("soapaction").and_then(|v| v.to_str().ok());
    let body = match std::str::from_utf8(&body) {
        Ok(body) => body,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, BadRequest::InvalidSoap.reason()).into_response();
        }
    };
    trace!(?soap_action, body, "received control request");

    match dispatch(&service, soap_action, body).await {
        SoapResult::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason).into_response(),
        SoapResult::Success(body) => {
            ([(CONTENT_TYPE, CONTENT_TYPE_XML_UTF8)], body).into_response()
        }
        SoapResult::Fault { body, .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(CONTENT_TYPE, CONTENT_TYPE_XML_UTF8)],
            body,
        )
            .into_response(),
    }
}

/// SUBSCRIBE handler stub: eventing is not implemented.
pub(crate) async fn subscribe_handler() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::{DataType, Value, ValueKind};
    use crate::service::{ActionOutput, ActionSpec, ServiceSpec, StateVariableSpec};

    fn envelope(inner: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
            <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"
                s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
                <s:Body>{inner}</s:Body>
            </s:Envelope>"#
        )
    }

    fn switch_service() -> Arc<Service> {
        let set_target =
            ActionSpec::new("SetTarget", |service: Arc<Service>, args: ActionArgs| {
                async move {
                    let target = args.get_bool("NewTargetValue")?;
                    service
                        .state_variable("Target")
                        .unwrap()
                        .set_value(Value::Bool(target))?;
                    Ok(ActionOutput::new().set("RetTargetValue", target))
                }
            })
            .in_arg("NewTargetValue", "Target", ValueKind::Bool)
            .out_arg("RetTargetValue", "Target", ValueKind::Bool);

        let set_both = ActionSpec::new("SetBoth", |_: Arc<Service>, args: ActionArgs| {
            async move {
                let target = args.get_bool("NewTargetValue")?;
                let level = args.get_u64("NewLevelValue")?;
                Ok(ActionOutput::new()
                    .set("RetTargetValue", target)
                    .set("RetLevelValue", level))
            }
        })
        .in_arg("NewTargetValue", "Target", ValueKind::Bool)
        .in_arg("NewLevelValue", "Level", ValueKind::UInt)
        .out_arg("RetTargetValue", "Target", ValueKind::Bool)
        .out_arg("RetLevelValue", "Level", ValueKind::UInt);

        let set_level = ActionSpec::new("SetLevel", |_: Arc<Service>, args: ActionArgs| {
            async move {
                let _ = args.get_u64("NewLevelValue")?;
                Ok(ActionOutput::new())
            }
        })
        .in_arg("NewLevelValue", "Level", ValueKind::UInt);

        let fail_plain = ActionSpec::new("FailPlain", |_: Arc<Service>, _: ActionArgs| {
            async move { Err::<ActionOutput, _>(UpnpError::action_failed("boom")) }
        });

        let fail_coded = ActionSpec::new("FailCoded", |_: Arc<Service>, _: ActionArgs| {
            async move {
                Err::<ActionOutput, _>(UpnpError::action_failed_with_code(718, "conflict"))
            }
        });

        let fail_zero = ActionSpec::new("FailZero", |_: Arc<Service>, _: ActionArgs| {
            async move { Err::<ActionOutput, _>(UpnpError::action_failed_with_code(0, "boom")) }
        });

        Service::from_spec(ServiceSpec {
            service_type: "urn:schemas-upnp-org:service:DummySvc:1".to_owned(),
            service_id: "urn:upnp-org:serviceId:DummySvc".to_owned(),
            scpd_url: "/DummySvc/scpd.xml".to_owned(),
            control_url: "/DummySvc/control".to_owned(),
            event_sub_url: "/DummySvc/events".to_owned(),
            state_variables: vec![
                StateVariableSpec::new("Target", DataType::Boolean).default_value(false),
                StateVariableSpec::new("Level", DataType::Ui2),
            ],
            actions: vec![set_target, set_both, set_level, fail_plain, fail_coded, fail_zero],
        })
        .unwrap()
    }

    #[test]
    fn test_parse_action_call() {
        let body = envelope(
            r#"<u:SetTarget xmlns:u="urn:schemas-upnp-org:service:DummySvc:1">
                <NewTargetValue>1</NewTargetValue>
            </u:SetTarget>"#,
        );
        let call = parse_action_call(
            Some("\"urn:schemas-upnp-org:service:DummySvc:1#SetTarget\""),
            &body,
        )
        .unwrap();
        assert_eq!(call.action_name, "SetTarget");
        assert_eq!(
            call.raw_args,
            vec![("NewTargetValue".to_owned(), "1".to_owned())]
        );
    }

    #[test]
    fn test_parse_rejects_bad_requests() {
        let body = envelope("<u:SetTarget xmlns:u=\"x\"></u:SetTarget>");
        assert_eq!(
            parse_action_call(None, &body).unwrap_err(),
            BadRequest::InvalidSoap
        );
        assert_eq!(
            parse_action_call(Some("no-separator"), &body).unwrap_err(),
            BadRequest::InvalidSoap
        );
        assert_eq!(
            parse_action_call(Some("\"a#b\""), "not xml <<<").unwrap_err(),
            BadRequest::InvalidSoap
        );
        assert_eq!(
            parse_action_call(Some("\"a#b\""), "<wrong><root/></wrong>").unwrap_err(),
            BadRequest::InvalidSoap
        );
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let service = switch_service();
        let body = envelope(
            r#"<u:SetTarget xmlns:u="urn:schemas-upnp-org:service:DummySvc:1">
                <NewTargetValue>1</NewTargetValue>
            </u:SetTarget>"#,
        );
        let result = dispatch(
            &service,
            Some("\"urn:schemas-upnp-org:service:DummySvc:1#SetTarget\""),
            &body,
        )
        .await;
        match result {
            SoapResult::Success(body) => {
                assert!(body.contains(
                    "<st:SetTargetResponse xmlns:st=\"urn:schemas-upnp-org:service:DummySvc:1\">"
                ));
                assert!(body.contains("<RetTargetValue>1</RetTargetValue>"));
            }
            other => panic!("expected success, got {other:?}"),
        }
        // The handler observed host boolean true.
        assert_eq!(
            service.state_variable("Target").unwrap().value(),
            Some(Value::Bool(true))
        );
    }

    #[tokio::test]
    async fn test_dispatch_accepts_args_in_any_order() {
        let service = switch_service();
        for inner in [
            r#"<u:SetBoth xmlns:u="x">
                <NewTargetValue>1</NewTargetValue>
                <NewLevelValue>42</NewLevelValue>
            </u:SetBoth>"#,
            r#"<u:SetBoth xmlns:u="x">
                <NewLevelValue>42</NewLevelValue>
                <!-- comment -->
                <NewTargetValue>1</NewTargetValue>
            </u:SetBoth>"#,
        ] {
            let body = envelope(inner);
            let result = dispatch(&service, Some("\"x#SetBoth\""), &body).await;
            match result {
                SoapResult::Success(body) => {
                    assert!(body.contains("<st:SetBothResponse"));
                    assert!(body.contains("<RetLevelValue>42</RetLevelValue>"));
                }
                other => panic!("expected success, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_dispatch_unknown_action() {
        let service = switch_service();
        let body = envelope("<u:Nope xmlns:u=\"x\"></u:Nope>");
        let result = dispatch(&service, Some("\"x#UnknownAction\""), &body).await;
        match result {
            SoapResult::BadRequest(reason) => assert_eq!(reason, "InvalidAction"),
            other => panic!("expected bad request, got {other:?}"),
        }
        // No handler ran; state is untouched.
        assert_eq!(
            service.state_variable("Target").unwrap().value(),
            Some(Value::Bool(false))
        );
    }

    #[tokio::test]
    async fn test_dispatch_unknown_argument() {
        let service = switch_service();
        let body = envelope(
            r#"<u:SetTarget xmlns:u="x"><Bogus>1</Bogus></u:SetTarget>"#,
        );
        let result = dispatch(&service, Some("\"x#SetTarget\""), &body).await;
        match result {
            SoapResult::BadRequest(reason) => assert_eq!(reason, "InvalidActionArgument"),
            other => panic!("expected bad request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_bad_value_is_fault_402() {
        let service = switch_service();
        let body = envelope(
            r#"<u:SetLevel xmlns:u="x"><NewLevelValue>not-a-number</NewLevelValue></u:SetLevel>"#,
        );
        let result = dispatch(&service, Some("\"x#SetLevel\""), &body).await;
        match result {
            SoapResult::Fault { body, code } => {
                assert_eq!(code, 402);
                assert!(body.contains("<errorCode>402</errorCode>"));
                assert!(body.contains("<faultcode>s:Client</faultcode>"));
                assert!(body.contains("<faultstring>UPnPError</faultstring>"));
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_missing_argument_is_fault_402() {
        let service = switch_service();
        let body = envelope(r#"<u:SetLevel xmlns:u="x"></u:SetLevel>"#);
        let result = dispatch(&service, Some("\"x#SetLevel\""), &body).await;
        match result {
            SoapResult::Fault { code, .. } => assert_eq!(code, 402),
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_handler_errors() {
        let service = switch_service();
        let body = envelope(r#"<u:X xmlns:u="x"></u:X>"#);

        match dispatch(&service, Some("\"x#FailPlain\""), &body).await {
            SoapResult::Fault { code, .. } => assert_eq!(code, 501),
            other => panic!("expected fault, got {other:?}"),
        }
        match dispatch(&service, Some("\"x#FailCoded\""), &body).await {
            SoapResult::Fault { body, code } => {
                assert_eq!(code, 718);
                assert!(body.contains("<errorCode>718</errorCode>"));
            }
            other => panic!("expected fault, got {other:?}"),
        }
        // Explicit code 0 is unset and falls through to 501.
        match dispatch(&service, Some("\"x#FailZero\""), &body).await {
            SoapResult::Fault { code, .. } => assert_eq!(code, 501),
            other => panic!("expected fault, got {other:?}"),
        }
    }
}
