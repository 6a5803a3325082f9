//! Host-side container configuration: bind mounts and port bindings.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use super::ContainerError;

const DEFAULT_PROTOCOL: &str = "tcp";

/// One published port: container `port/protocol` to a host port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub container_port: u16,
    pub protocol: String,
    pub host_port: u16,
}

impl PortBinding {
    /// `<hostPort>:<containerPort>/<protocol>`, as `docker create --publish` expects.
    pub fn publish_arg(&self) -> String {
        format!("{}:{}/{}", self.host_port, self.container_port, self.protocol)
    }
}

/// Host configuration for a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostConfig {
    /// `<host path>:<container path>` bind mounts.
    pub binds: Vec<String>,
    pub port_bindings: Vec<PortBinding>,
    pub privileged: bool,
}

impl HostConfig {
    /// Bind dirs, files and unix sockets (each keyed by container path) and publish ports.
    ///
    /// Sockets whose host side is not a filesystem path are not mounted.
    pub fn construct(
        dirs: &BTreeMap<String, String>,
        files: &BTreeMap<String, String>,
        sockets: &BTreeMap<String, String>,
        port_bindings: Vec<PortBinding>,
    ) -> Self {
        let mut binds: Vec<String> = dirs
            .iter()
            .chain(files)
            .map(|(container_path, host_path)| format!("{host_path}:{container_path}"))
            .collect();

        for (container_address, host_address) in sockets {
            if Path::new(host_address).is_absolute() {
                binds.push(format!("{host_address}:{container_address}"));
            } else {
                debug!(socket = %host_address, "skipping non-unix socket binding");
            }
        }

        Self {
            binds,
            port_bindings,
            privileged: true,
        }
    }
}

/// Parse `"<port>[-<end>][/<proto>]" -> "<hostPort>[-<end>]"` entries.
///
/// Ranges expand to one binding per port and must be the same length on both sides.
pub fn parse_port_bindings(ports: &BTreeMap<String, String>) -> Result<Vec<PortBinding>, ContainerError> {
    let mut bindings = Vec::new();
    for (container_spec, host_spec) in ports {
        let binding = format!("{container_spec}={host_spec}");
        let (container_range, protocol) = match container_spec.split_once('/') {
            Some((range, protocol)) if !protocol.is_empty() => (range, protocol.to_ascii_lowercase()),
            Some(_) => return Err(ContainerError::invalid_port_binding(binding, "empty protocol")),
            None => (container_spec.as_str(), DEFAULT_PROTOCOL.to_string()),
        };
        let (container_start, container_end) = parse_range(container_range).map_err(|reason| ContainerError::invalid_port_binding(&binding, reason))?;
        let (host_start, host_end) = parse_range(host_spec).map_err(|reason| ContainerError::invalid_port_binding(&binding, reason))?;

        if container_end - container_start != host_end - host_start {
            return Err(ContainerError::invalid_port_binding(binding, "container and host ranges differ in length"));
        }
        for offset in 0..=(container_end - container_start) {
            bindings.push(PortBinding {
                container_port: container_start + offset,
                protocol: protocol.clone(),
                host_port: host_start + offset,
            });
        }
    }
    Ok(bindings)
}

fn parse_range(range: &str) -> Result<(u16, u16), String> {
    let parse = |port: &str| port.trim().parse::<u16>().map_err(|_| format!("'{port}' is not a port number"));
    let (start, end) = match range.split_once('-') {
        Some((start, end)) => (parse(start)?, parse(end)?),
        None => {
            let port = parse(range)?;
            (port, port)
        }
    };
    if end < start {
        return Err(format!("range '{range}' ends before it starts"));
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect()
    }

    #[test]
    fn test_single_port_defaults_to_tcp() {
        let bindings = parse_port_bindings(&ports(&[("80", "8080")])).unwrap();
        assert_eq!(
            bindings,
            vec![PortBinding {
                container_port: 80,
                protocol: "tcp".into(),
                host_port: 8080,
            }]
        );
        assert_eq!(bindings[0].publish_arg(), "8080:80/tcp");
    }

    #[test]
    fn test_ranges_expand_pairwise() {
        let bindings = parse_port_bindings(&ports(&[("6000-6002/udp", "7000-7002")])).unwrap();
        let published: Vec<_> = bindings.iter().map(PortBinding::publish_arg).collect();
        assert_eq!(published, ["7000:6000/udp", "7001:6001/udp", "7002:6002/udp"]);
    }

    #[test]
    fn test_invalid_bindings_are_rejected() {
        for (container, host) in [("http", "80"), ("80", "not-a-port"), ("80-81", "90"), ("90-80", "90-80"), ("80/", "80")] {
            let err = parse_port_bindings(&ports(&[(container, host)])).unwrap_err();
            assert!(matches!(err, ContainerError::InvalidPortBinding { .. }), "{container}={host}");
        }
    }

    #[test]
    fn test_host_config_binds_mounts_and_unix_sockets() {
        let dirs = ports(&[("/src", "/home/me/src")]);
        let files = ports(&[("/etc/app.conf", "/tmp/app.conf")]);
        let sockets = ports(&[("/var/run/docker.sock", "/var/run/docker.sock"), ("0.0.0.0:9000", "localhost:9000")]);

        let config = HostConfig::construct(&dirs, &files, &sockets, Vec::new());
        assert_eq!(
            config.binds,
            ["/home/me/src:/src", "/tmp/app.conf:/etc/app.conf", "/var/run/docker.sock:/var/run/docker.sock"]
        );
        assert!(config.privileged);
    }
}
