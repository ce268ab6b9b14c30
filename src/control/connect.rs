// ABOUTME: Decides between reusing, starting, or skipping a control master.
// ABOUTME: Dials the control socket and hands the stream to the caller's session factory.

use super::master::start_control_master;
use crate::config::{ControlConfig, MasterConfig, MultiplexMode, resolve_home};
use crate::prompt::Prompter;
use crate::shutdown::ShutdownRegistry;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

const DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Try to obtain a transport over the control socket for `master_cfg`'s
/// destination. `attach` is the external seam that frames the raw stream
/// with the OpenSSH multiplexing sub-protocol and builds a session from it.
///
/// Multiplexing is an optimization: every failure here returns `None` and
/// the caller falls back to an independent connection.
pub async fn connect_via_control<T, E, F, Fut>(
    control: &ControlConfig,
    master_cfg: &MasterConfig,
    registry: &ShutdownRegistry,
    prompter: Option<Arc<dyn Prompter>>,
    attach: F,
) -> Option<T>
where
    F: FnOnce(UnixStream) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    if matches!(control.path.to_ascii_lowercase().as_str(), "" | "none") {
        return None;
    }

    let socket = resolve_home(&control.path);

    match control.mode {
        MultiplexMode::Off => return None,
        MultiplexMode::Yes | MultiplexMode::Ask if socket.exists() => {
            // Conservative: an existing path under an exclusive-ownership
            // mode means we neither start a master nor dial it.
            warn!(
                socket = %socket.display(),
                "control socket already exists, disabling multiplexing"
            );
            return None;
        }
        MultiplexMode::Yes | MultiplexMode::Ask | MultiplexMode::Auto | MultiplexMode::AutoAsk => {
            // A pre-existing master may already be listening, so a failed
            // start still falls through to the dial.
            if let Err(err) = start_control_master(master_cfg, registry, prompter).await {
                warn!("start control master failed: {err}");
            }
        }
    }

    debug!(
        destination = %master_cfg.destination,
        socket = %socket.display(),
        "dialing control socket"
    );

    let stream = match timeout(DIAL_TIMEOUT, UnixStream::connect(&socket)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            warn!(socket = %socket.display(), "dial control socket failed: {err}");
            return None;
        }
        Err(_) => {
            warn!(socket = %socket.display(), "dial control socket timed out");
            return None;
        }
    };

    match attach(stream).await {
        Ok(transport) => {
            debug!(destination = %master_cfg.destination, "login via control socket success");
            Some(transport)
        }
        Err(err) => {
            warn!(socket = %socket.display(), "attach to control socket failed: {err}");
            None
        }
    }
}
