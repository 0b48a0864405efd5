pub const UPNP_ROOT_DEVICE: &str = "upnp:rootdevice";
pub const SSDP_ST_ALL: &str = "ssdp:all";
pub const SSDP_DISCOVER: &str = "\"ssdp:discover\"";

pub const NTS_ALIVE: &str = "ssdp:alive";
pub const NTS_BYEBYE: &str = "ssdp:byebye";

pub const DEFAULT_SERVER_STRING: &str = "Linux/3.4 UPnP/2.0 upnp-serve/1";

pub const CONTENT_TYPE_XML_UTF8: &str = "text/xml; charset=\"utf-8\"";

pub const NS_SOAP_ENVELOPE: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const NS_SOAP_ENCODING: &str = "http://schemas.xmlsoap.org/soap/encoding/";
pub const NS_UPNP_DEVICE: &str = "urn:schemas-upnp-org:device-1-0";
pub const NS_UPNP_SERVICE: &str = "urn:schemas-upnp-org:service-1-0";
pub const NS_UPNP_CONTROL: &str = "urn:schemas-upnp-org:control-1-0";
