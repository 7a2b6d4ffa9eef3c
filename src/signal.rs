use std::io;
use std::sync::Arc;
use std::thread;

use arc_swap::ArcSwap;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{error, info, warn};

use crate::config::Config;

/// Re-read the config file and swap in the new boot settings.
///
/// The pool, bind address and listeners are fixed for the life of the
/// process, changes to them are reported and ignored.
pub fn reload(config: &ArcSwap<Config>) {
    let current = config.load_full();
    let Some(path) = current.path.as_ref() else {
        info!("no config file, nothing to reload");
        return;
    };

    match current.reload() {
        Ok(new) => {
            if (new.pool_begin, new.pool_end) != (current.pool_begin, current.pool_end) {
                warn!(
                    "lease pool change to {}-{} requires a restart",
                    new.pool_begin, new.pool_end
                );
            }
            if new.bind != current.bind || new.mgmt != current.mgmt || new.notify != current.notify
            {
                warn!("listener or registry address change requires a restart");
            }

            let mut next = (*current).clone();
            next.boot = new.boot;
            next.client_port = new.client_port;
            info!(
                path = %path.display(),
                boot_filename = %next.boot.boot_filename,
                "reloaded configuration"
            );
            config.store(Arc::new(next));
        }
        Err(e) => error!(%e, "failed to reload configuration, keeping current"),
    }
}

/// Spawn a thread handling SIGHUP by reloading the config, and SIGINT or
/// SIGTERM by calling `shutdown` once.
pub fn spawn_signal_handler<F>(
    config: Arc<ArcSwap<Config>>,
    shutdown: F,
) -> io::Result<thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let mut signals = Signals::new([SIGHUP, SIGINT, SIGTERM])?;

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            let mut shutdown = Some(shutdown);
            for sig in signals.forever() {
                match sig {
                    SIGHUP => {
                        info!("received SIGHUP, reloading configuration");
                        reload(&config);
                    }
                    SIGINT | SIGTERM => {
                        info!(signal = sig, "shutting down");
                        if let Some(f) = shutdown.take() {
                            f();
                        }
                    }
                    _ => {}
                }
            }
        })
}
