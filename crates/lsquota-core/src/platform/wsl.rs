//! WSL networking detection.
//!
//! Under WSL2 with NAT networking, a server listening on the Windows host's
//! loopback is reachable from Linux only through the default gateway. In
//! mirrored mode loopback is shared and no secondary address is needed.
//! The nameserver in `/etc/resolv.conf` is not the host address in mirrored
//! mode, so it is never used.

use std::net::Ipv4Addr;

use tracing::debug;

use crate::runner::{CommandRunner, CommandSpec, COMMAND_TIMEOUT};

/// `wslinfo --networking-mode` result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkingMode {
    Nat,
    Mirrored,
}

/// Network situation of this process
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WslNetwork {
    /// Not running under WSL
    #[default]
    Native,
    /// WSL2 NAT; host reachable through the default gateway
    Nat { host_ip: Option<Ipv4Addr> },
    /// WSL2 mirrored networking; loopback reaches the host
    Mirrored,
}

impl WslNetwork {
    /// Detect the WSL networking mode of this process
    pub async fn detect<R: CommandRunner>(runner: &R) -> Self {
        Self::detect_with(runner, is_wsl()).await
    }

    pub(crate) async fn detect_with<R: CommandRunner>(runner: &R, wsl: bool) -> Self {
        if !wsl {
            return WslNetwork::Native;
        }

        let mode_cmd = CommandSpec::new("wslinfo").arg("--networking-mode");
        let mode = runner
            .run(&mode_cmd, COMMAND_TIMEOUT)
            .await
            .ok()
            .and_then(|o| parse_networking_mode(&o.stdout));
        if mode == Some(NetworkingMode::Mirrored) {
            debug!("WSL mirrored networking detected");
            return WslNetwork::Mirrored;
        }

        let route_cmd = CommandSpec::new("ip").args(["route", "show", "default"]);
        let host_ip = runner
            .run(&route_cmd, COMMAND_TIMEOUT)
            .await
            .ok()
            .and_then(|o| parse_default_gateway(&o.stdout));
        debug!("WSL NAT networking detected, host gateway: {:?}", host_ip);
        WslNetwork::Nat { host_ip }
    }

    /// Addresses to probe after loopback
    pub fn secondary_hosts(&self) -> Vec<String> {
        match self {
            WslNetwork::Nat { host_ip: Some(ip) } => vec![ip.to_string()],
            _ => Vec::new(),
        }
    }
}

/// True when running inside WSL
pub fn is_wsl() -> bool {
    if !cfg!(target_os = "linux") {
        return false;
    }
    if std::env::var_os("WSL_DISTRO_NAME").is_some() || std::env::var_os("WSL_INTEROP").is_some() {
        return true;
    }
    std::fs::read_to_string("/proc/version")
        .map(|v| v.to_lowercase().contains("microsoft"))
        .unwrap_or(false)
}

pub fn parse_networking_mode(stdout: &str) -> Option<NetworkingMode> {
    match stdout.trim().to_lowercase().as_str() {
        "nat" => Some(NetworkingMode::Nat),
        "mirrored" => Some(NetworkingMode::Mirrored),
        _ => None,
    }
}

/// Gateway of `default via <ip> dev eth0 ...`
pub fn parse_default_gateway(stdout: &str) -> Option<Ipv4Addr> {
    stdout.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        if fields.next()? != "default" || fields.next()? != "via" {
            return None;
        }
        fields.next()?.parse().ok()
    })
}
