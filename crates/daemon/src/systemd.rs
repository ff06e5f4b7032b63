//! Systemd integration for the termdeck daemon.
//!
//! Provides the sd_notify protocol for `Type=notify` services and a unit
//! file generator for installation.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use daemon::systemd::{is_systemd, notify_ready, notify_status, notify_stopping};
//!
//! if is_systemd() {
//!     notify_ready();
//!     notify_status("4 sessions, 2 bridges");
//!     notify_stopping();
//! }
//! ```

use std::env;
use std::io;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::{SocketAddr, UnixDatagram};
use std::path::PathBuf;

use tracing::{debug, error, info, warn};

/// Environment variable name for the systemd notification socket.
const NOTIFY_SOCKET_ENV: &str = "NOTIFY_SOCKET";

/// Check if the daemon is running under systemd.
///
/// Returns `true` if the `NOTIFY_SOCKET` environment variable is set,
/// indicating that systemd expects notifications from this service.
pub fn is_systemd() -> bool {
    env::var_os(NOTIFY_SOCKET_ENV).is_some()
}

/// Where systemd listens for notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
enum NotifyTarget {
    /// Filesystem socket.
    Path(PathBuf),
    /// Linux abstract socket, given as `@name`.
    Abstract(Vec<u8>),
}

fn notify_target() -> Option<NotifyTarget> {
    let raw = env::var_os(NOTIFY_SOCKET_ENV)?;
    let bytes = raw.as_bytes();
    match bytes.first() {
        Some(b'@') => Some(NotifyTarget::Abstract(bytes[1..].to_vec())),
        Some(b'/') => Some(NotifyTarget::Path(PathBuf::from(raw))),
        _ => {
            warn!("Invalid NOTIFY_SOCKET path: {:?}", raw);
            None
        }
    }
}

/// Send one `KEY=VALUE\n` notification. A no-op outside systemd.
fn notify(message: &str) -> io::Result<()> {
    let Some(target) = notify_target() else {
        debug!("Not running under systemd, skipping notification");
        return Ok(());
    };

    let socket = UnixDatagram::unbound()?;
    match target {
        NotifyTarget::Path(path) => socket.send_to(message.as_bytes(), path)?,
        NotifyTarget::Abstract(name) => {
            let addr = SocketAddr::from_abstract_name(name)?;
            socket.send_to_addr(message.as_bytes(), &addr)?
        }
    };

    debug!("Sent systemd notification: {}", message.trim());
    Ok(())
}

/// Notify systemd that the HTTP server is accepting requests.
pub fn notify_ready() {
    if let Err(e) = notify("READY=1\n") {
        error!("Failed to notify systemd of ready state: {}", e);
    } else {
        info!("Notified systemd: service ready");
    }
}

/// Send a status line shown by `systemctl status`.
pub fn notify_status(message: &str) {
    let notification = format!("STATUS={}\n", message);
    if let Err(e) = notify(&notification) {
        error!("Failed to notify systemd of status: {}", e);
    } else {
        debug!("Notified systemd: STATUS={}", message);
    }
}

/// Notify systemd that graceful shutdown has begun.
pub fn notify_stopping() {
    if let Err(e) = notify("STOPPING=1\n") {
        error!("Failed to notify systemd of stopping state: {}", e);
    } else {
        info!("Notified systemd: service stopping");
    }
}

/// Generate a systemd user unit for the termdeck daemon.
///
/// Save the output to `~/.config/systemd/user/termdeck.service`. The unit
/// is a user service because the daemon drives the operator's own
/// multiplexer server.
pub fn generate_unit_file(exec_path: Option<&str>) -> String {
    let exec = exec_path.unwrap_or("/usr/bin/termdeck");

    format!(
        r#"[Unit]
Description=termdeck browser terminal dashboard
After=network.target

[Service]
Type=notify
ExecStart={} serve --systemd
Restart=on-failure
RestartSec=5
TimeoutStartSec=30
TimeoutStopSec=30
KillMode=process

[Install]
WantedBy=default.target
"#,
        exec
    )
}
