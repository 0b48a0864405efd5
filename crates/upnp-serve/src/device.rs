use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::UpnpError;
use crate::service::{Service, ServiceSpec};

#[derive(Debug, Clone, Default)]
pub struct Icon {
    pub mimetype: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub url: String,
}

/// Static definition of a device. The server instantiates the runtime
/// [`Device`] tree from this at startup.
pub struct DeviceSpec {
    pub device_type: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub manufacturer_url: String,
    pub model_description: String,
    pub model_name: String,
    pub model_number: String,
    pub model_url: String,
    pub serial_number: String,
    pub udn: String,
    pub upc: String,
    pub presentation_url: String,
    /// Relative URL the description document is served at. Only meaningful
    /// on the root device.
    pub device_url: String,
    pub icons: Vec<Icon>,
    pub services: Vec<ServiceSpec>,
    pub embedded_devices: Vec<DeviceSpec>,
}

impl Default for DeviceSpec {
    fn default() -> Self {
        Self {
            device_type: String::new(),
            friendly_name: String::new(),
            manufacturer: String::new(),
            manufacturer_url: String::new(),
            model_description: String::new(),
            model_name: String::new(),
            model_number: String::new(),
            model_url: String::new(),
            serial_number: String::new(),
            udn: String::new(),
            upc: String::new(),
            presentation_url: String::new(),
            device_url: "/device.xml".to_owned(),
            icons: Vec::new(),
            services: Vec::new(),
            embedded_devices: Vec::new(),
        }
    }
}

/// A node in the running device tree. Built once at server start, read by
/// the SSDP and HTTP subsystems for the lifetime of the server.
pub struct Device {
    pub device_type: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub manufacturer_url: String,
    pub model_description: String,
    pub model_name: String,
    pub model_number: String,
    pub model_url: String,
    pub serial_number: String,
    pub udn: String,
    pub upc: String,
    pub presentation_url: String,
    pub device_url: String,
    pub base_uri: String,
    pub icons: Vec<Icon>,
    services: IndexMap<String, Arc<Service>>,
    embedded_devices: IndexMap<String, Arc<Device>>,
}

impl Device {
    /// Instantiate the runtime tree and check tree-wide invariants.
    pub fn build(spec: DeviceSpec, base_uri: &str) -> Result<Arc<Device>, UpnpError> {
        let root = Self::from_spec(spec, base_uri)?;

        let mut udns = HashSet::new();
        for device in root.all_devices() {
            if !udns.insert(device.udn.clone()) {
                return Err(UpnpError::DuplicateUdn(device.udn.clone()));
            }
        }
        Ok(root)
    }

    fn from_spec(spec: DeviceSpec, base_uri: &str) -> Result<Arc<Device>, UpnpError> {
        let mut services = IndexMap::new();
        for service_spec in spec.services {
            let service = Service::from_spec(service_spec)?;
            services.insert(service.service_type.clone(), service);
        }

        let mut embedded_devices = IndexMap::new();
        for device_spec in spec.embedded_devices {
            let device = Self::from_spec(device_spec, base_uri)?;
            embedded_devices.insert(device.udn.clone(), device);
        }

        Ok(Arc::new(Device {
            device_type: spec.device_type,
            friendly_name: spec.friendly_name,
            manufacturer: spec.manufacturer,
            manufacturer_url: spec.manufacturer_url,
            model_description: spec.model_description,
            model_name: spec.model_name,
            model_number: spec.model_number,
            model_url: spec.model_url,
            serial_number: spec.serial_number,
            udn: spec.udn,
            upc: spec.upc,
            presentation_url: spec.presentation_url,
            device_url: spec.device_url,
            base_uri: base_uri.to_owned(),
            icons: spec.icons,
            services,
            embedded_devices,
        }))
    }

    pub fn services(&self) -> impl Iterator<Item = &Arc<Service>> {
        self.services.values()
    }

    pub fn service(&self, service_type: &str) -> Option<&Arc<Service>> {
        self.services.get(service_type)
    }

    pub fn embedded_devices(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.embedded_devices.values()
    }

    /// This device first, then all embedded devices, depth-first in
    /// insertion order.
    pub fn all_devices(self: &Arc<Self>) -> Vec<Arc<Device>> {
        let mut out = vec![self.clone()];
        for device in self.embedded_devices.values() {
            out.extend(device.all_devices());
        }
        out
    }

    /// Services of every device in [`Device::all_devices`] order.
    pub fn all_services(self: &Arc<Self>) -> Vec<Arc<Service>> {
        self.all_devices()
            .iter()
            .flat_map(|device| device.services.values().cloned())
            .collect()
    }

    /// The absolute location of the root description document, as used in
    /// SSDP LOCATION headers.
    pub fn location(&self) -> String {
        format!("{}{}", self.base_uri, self.device_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_spec(udn: &str, embedded: Vec<DeviceSpec>) -> DeviceSpec {
        DeviceSpec {
            udn: udn.to_owned(),
            device_type: format!("urn:schemas-upnp-org:device:Test:{udn}"),
            embedded_devices: embedded,
            ..Default::default()
        }
    }

    #[test]
    fn test_all_devices_depth_first() {
        let spec = device_spec(
            "uuid:root",
            vec![
                device_spec("uuid:a", vec![device_spec("uuid:a1", vec![])]),
                device_spec("uuid:b", vec![]),
            ],
        );
        let root = Device::build(spec, "http://192.0.2.1:8080").unwrap();
        let udns: Vec<String> = root
            .all_devices()
            .iter()
            .map(|d| d.udn.clone())
            .collect();
        assert_eq!(udns, vec!["uuid:root", "uuid:a", "uuid:a1", "uuid:b"]);
    }

    #[test]
    fn test_duplicate_udn_rejected() {
        let spec = device_spec("uuid:same", vec![device_spec("uuid:same", vec![])]);
        match Device::build(spec, "http://192.0.2.1:8080") {
            Err(UpnpError::DuplicateUdn(udn)) => assert_eq!(udn, "uuid:same"),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected DuplicateUdn"),
        }
    }

    #[test]
    fn test_location() {
        let root = Device::build(device_spec("uuid:root", vec![]), "http://192.0.2.1:8080").unwrap();
        assert_eq!(root.location(), "http://192.0.2.1:8080/device.xml");
    }
}
