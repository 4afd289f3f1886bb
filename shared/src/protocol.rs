/// API path prefix
pub const API_PREFIX: &str = "/api";

/// SRV service and protocol labels used for Minecraft discovery
pub const SRV_SERVICE: &str = "_minecraft";
pub const SRV_PROTO: &str = "_tcp";

/// Priority and weight written on every SRV record we manage
pub const SRV_PRIORITY: u16 = 1;
pub const SRV_WEIGHT: u16 = 1;

/// Port assumed when a record carries none
pub const DEFAULT_MINECRAFT_PORT: u16 = 25565;

/// SRV record name for a public domain, e.g. "_minecraft._tcp.mc.example.com"
pub fn srv_name(domain: &str) -> String {
    format!("{SRV_SERVICE}.{SRV_PROTO}.{domain}")
}

/// Inverse of [`srv_name`]. Returns None for records that are not Minecraft SRV names.
pub fn domain_from_srv_name(name: &str) -> Option<&str> {
    let prefix = format!("{SRV_SERVICE}.{SRV_PROTO}.");
    name.strip_prefix(prefix.as_str())
        .filter(|domain| !domain.is_empty())
}

/// SRV record content: "priority weight port target"
pub fn srv_content(priority: u16, weight: u16, port: u16, target: &str) -> String {
    format!("{priority} {weight} {port} {target}")
}
