use std::io;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::constants::{NS_UPNP_DEVICE, NS_UPNP_SERVICE};
use crate::device::Device;
use crate::service::Service;

type XmlWriter = quick_xml::Writer<Vec<u8>>;

fn text_element(w: &mut XmlWriter, name: &str, text: &str) -> io::Result<()> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn spec_version(w: &mut XmlWriter) -> io::Result<()> {
    w.write_event(Event::Start(BytesStart::new("specVersion")))?;
    text_element(w, "major", "1")?;
    text_element(w, "minor", "0")?;
    w.write_event(Event::End(BytesEnd::new("specVersion")))?;
    Ok(())
}

fn into_string(w: XmlWriter) -> anyhow::Result<String> {
    Ok(String::from_utf8(w.into_inner())?)
}

/// Render the device description document served at the root device URL.
pub fn render_device_description(device: &Device) -> anyhow::Result<String> {
    let mut w = quick_xml::Writer::new(Vec::new());
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    w.write_event(Event::Start(
        BytesStart::new("root").with_attributes([("xmlns", NS_UPNP_DEVICE)]),
    ))?;
    spec_version(&mut w)?;
    device_element(&mut w, device)?;
    w.write_event(Event::End(BytesEnd::new("root")))?;
    into_string(w)
}

fn device_element(w: &mut XmlWriter, device: &Device) -> io::Result<()> {
    w.write_event(Event::Start(
        BytesStart::new("device").with_attributes([("xmlns", NS_UPNP_DEVICE)]),
    ))?;
    text_element(w, "deviceType", &device.device_type)?;
    text_element(w, "friendlyName", &device.friendly_name)?;
    text_element(w, "manufacturer", &device.manufacturer)?;
    text_element(w, "manufacturerURL", &device.manufacturer_url)?;
    text_element(w, "modelDescription", &device.model_description)?;
    text_element(w, "modelName", &device.model_name)?;
    text_element(w, "modelNumber", &device.model_number)?;
    text_element(w, "modelURL", &device.model_url)?;
    text_element(w, "serialNumber", &device.serial_number)?;
    text_element(w, "UDN", &device.udn)?;
    text_element(w, "UPC", &device.upc)?;
    text_element(w, "presentationURL", &device.presentation_url)?;

    w.write_event(Event::Start(BytesStart::new("iconList")))?;
    for icon in &device.icons {
        w.write_event(Event::Start(BytesStart::new("icon")))?;
        text_element(w, "mimetype", &icon.mimetype)?;
        text_element(w, "width", &icon.width.to_string())?;
        text_element(w, "height", &icon.height.to_string())?;
        text_element(w, "depth", &icon.depth.to_string())?;
        text_element(w, "url", &icon.url)?;
        w.write_event(Event::End(BytesEnd::new("icon")))?;
    }
    w.write_event(Event::End(BytesEnd::new("iconList")))?;

    w.write_event(Event::Start(BytesStart::new("serviceList")))?;
    for service in device.services() {
        w.write_event(Event::Start(BytesStart::new("service")))?;
        text_element(w, "serviceType", &service.service_type)?;
        text_element(w, "serviceId", &service.service_id)?;
        text_element(w, "controlURL", &service.control_url)?;
        text_element(w, "eventSubURL", &service.event_sub_url)?;
        text_element(w, "SCPDURL", &service.scpd_url)?;
        w.write_event(Event::End(BytesEnd::new("service")))?;
    }
    w.write_event(Event::End(BytesEnd::new("serviceList")))?;

    w.write_event(Event::Start(BytesStart::new("deviceList")))?;
    for embedded in device.embedded_devices() {
        device_element(w, embedded)?;
    }
    w.write_event(Event::End(BytesEnd::new("deviceList")))?;

    w.write_event(Event::End(BytesEnd::new("device")))?;
    Ok(())
}

/// Render the SCPD document served at a service's SCPD URL.
pub fn render_scpd(service: &Service) -> anyhow::Result<String> {
    let mut w = quick_xml::Writer::new(Vec::new());
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    w.write_event(Event::Start(
        BytesStart::new("scpd").with_attributes([("xmlns", NS_UPNP_SERVICE)]),
    ))?;
    spec_version(&mut w)?;

    w.write_event(Event::Start(BytesStart::new("actionList")))?;
    for action in service.actions() {
        w.write_event(Event::Start(BytesStart::new("action")))?;
        text_element(&mut w, "name", action.name())?;
        if !action.arguments().is_empty() {
            w.write_event(Event::Start(BytesStart::new("argumentList")))?;
            for argument in action.in_arguments().chain(action.out_arguments()) {
                w.write_event(Event::Start(BytesStart::new("argument")))?;
                text_element(&mut w, "name", &argument.name)?;
                text_element(&mut w, "direction", argument.direction.as_upnp())?;
                text_element(
                    &mut w,
                    "relatedStateVariable",
                    &argument.related_state_variable,
                )?;
                w.write_event(Event::End(BytesEnd::new("argument")))?;
            }
            w.write_event(Event::End(BytesEnd::new("argumentList")))?;
        }
        w.write_event(Event::End(BytesEnd::new("action")))?;
    }
    w.write_event(Event::End(BytesEnd::new("actionList")))?;

    w.write_event(Event::Start(BytesStart::new("serviceStateTable")))?;
    for state_var in service.state_variables() {
        let send_events = if state_var.send_events() { "yes" } else { "no" };
        w.write_event(Event::Start(
            BytesStart::new("stateVariable").with_attributes([("sendEvents", send_events)]),
        ))?;
        text_element(&mut w, "name", state_var.name())?;
        text_element(&mut w, "dataType", state_var.data_type().as_upnp())?;
        if let Some(allowed) = state_var.allowed_values() {
            w.write_event(Event::Start(BytesStart::new("allowedValueList")))?;
            for value in allowed {
                text_element(&mut w, "allowedValue", value)?;
            }
            w.write_event(Event::End(BytesEnd::new("allowedValueList")))?;
        }
        if let Some(range) = state_var.allowed_range() {
            let minimum = state_var.data_type().render(&range.minimum)?;
            let maximum = state_var.data_type().render(&range.maximum)?;
            w.write_event(Event::Start(BytesStart::new("allowedValueRange")))?;
            text_element(&mut w, "minimum", &minimum)?;
            text_element(&mut w, "maximum", &maximum)?;
            w.write_event(Event::End(BytesEnd::new("allowedValueRange")))?;
        }
        if let Some(default) = state_var.default_value() {
            let default = state_var.data_type().render(default)?;
            text_element(&mut w, "defaultValue", &default)?;
        }
        w.write_event(Event::End(BytesEnd::new("stateVariable")))?;
    }
    w.write_event(Event::End(BytesEnd::new("serviceStateTable")))?;

    w.write_event(Event::End(BytesEnd::new("scpd")))?;
    into_string(w)
}
