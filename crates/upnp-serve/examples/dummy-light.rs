use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use upnp_serve::datatype::{DataType, Value, ValueKind};
use upnp_serve::service::{ActionArgs, ActionOutput, ActionSpec, StateVariableSpec};
use upnp_serve::{
    DEFAULT_SERVER_STRING, DeviceSpec, Service, ServiceSpec, UpnpServer, UpnpServerOptions,
};

fn switch_power_service() -> ServiceSpec {
    let set_target = ActionSpec::new("SetTarget", |service: Arc<Service>, args: ActionArgs| {
        async move {
            let target = args.get_bool("NewTargetValue")?;
            info!(target, "SetTarget called");
            for name in ["Target", "Status"] {
                if let Some(var) = service.state_variable(name) {
                    var.set_value(Value::Bool(target))?;
                }
            }
            Ok(ActionOutput::new())
        }
    })
    .in_arg("NewTargetValue", "Target", ValueKind::Bool);

    let get_status = ActionSpec::new("GetStatus", |service: Arc<Service>, _: ActionArgs| {
        async move {
            let status = service
                .state_variable("Status")
                .and_then(|v| v.value())
                .unwrap_or(Value::Bool(false));
            Ok(ActionOutput::new().set("ResultStatus", status))
        }
    })
    .out_arg("ResultStatus", "Status", ValueKind::Bool);

    ServiceSpec {
        service_type: "urn:schemas-upnp-org:service:SwitchPower:1".to_owned(),
        service_id: "urn:upnp-org:serviceId:SwitchPower:1".to_owned(),
        scpd_url: "/SwitchPower/scpd.xml".to_owned(),
        control_url: "/SwitchPower/control".to_owned(),
        event_sub_url: "/SwitchPower/events".to_owned(),
        state_variables: vec![
            StateVariableSpec::new("Target", DataType::Boolean).default_value(false),
            StateVariableSpec::new("Status", DataType::Boolean)
                .send_events(true)
                .default_value(false),
        ],
        actions: vec![set_target, get_status],
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "debug") };
    }
    tracing_subscriber::fmt::init();

    let source: SocketAddr = std::env::var("UPNP_SOURCE")
        .context("set UPNP_SOURCE to your LAN IP, e.g. 192.168.1.10:1900")?
        .parse()
        .context("UPNP_SOURCE is not a socket address")?;

    let root_device = DeviceSpec {
        udn: format!("uuid:{}", uuid::Uuid::new_v4()),
        device_type: "urn:schemas-upnp-org:device:BinaryLight:1".to_owned(),
        friendly_name: "Demo Binary Light".to_owned(),
        manufacturer: "upnp-serve".to_owned(),
        model_name: "DemoLight".to_owned(),
        model_number: "1.0".to_owned(),
        services: vec![switch_power_service()],
        ..Default::default()
    };

    info!("starting UPnP server");
    let server = UpnpServer::start(UpnpServerOptions {
        root_device,
        source,
        target: None,
        http_port: 9005,
        server_string: DEFAULT_SERVER_STRING.to_owned(),
    })
    .await?;

    info!(
        "device description at http://{}{}",
        server.http_addr(),
        server.device().device_url
    );

    std::future::pending::<()>().await;
    Ok(())
}
