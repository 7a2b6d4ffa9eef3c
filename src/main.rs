use std::net::TcpListener;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use arc_swap::ArcSwap;
use netbootd::{
    config::{Config, USAGE},
    interface::Interface,
    leasedb::LeasePool,
    logging, mgmt,
    notify::{self, ChannelNotifier, DeclineNotifier, LogNotifier},
    signal,
    v4::{self, transport::PktInfoSocket},
};
use tracing::{error, info};

fn main() -> ExitCode {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("netbootd: {e}\n\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };
    logging::init_stdout(config.log_level, config.log_format);

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let pool = Arc::new(LeasePool::new(config.pool_begin, config.pool_end)?);
    let socket = Arc::new(PktInfoSocket::bind(config.bind)?);
    info!(
        bind = %config.bind,
        pool_begin = %pool.begin(),
        pool_end = %pool.end(),
        boot_filename = %config.boot.boot_filename,
        "netbootd listening"
    );
    if let Some(name) = &config.interface {
        info!(interface = %name, "replies follow the arrival interface of each request");
    }

    let notifier: Box<dyn DeclineNotifier> = match &config.notify {
        Some(address) => {
            let (notifier, rx) = ChannelNotifier::with_queue(notify::QUEUE_DEPTH);
            notify::writer::spawn(address.clone(), rx)?;
            Box::new(notifier)
        }
        None => Box::new(LogNotifier),
    };

    let mgmt_addr = config.mgmt;
    let config = Arc::new(ArcSwap::from_pointee(config));

    if let Some(addr) = mgmt_addr {
        let listener = TcpListener::bind(addr)?;
        info!(%addr, "management listener started");
        let pool = Arc::clone(&pool);
        let config = Arc::clone(&config);
        thread::Builder::new()
            .name("mgmt".to_string())
            .spawn(move || mgmt::listener(listener, pool, config))?;
    }

    {
        let socket = Arc::clone(&socket);
        signal::spawn_signal_handler(Arc::clone(&config), move || socket.close())?;
    }

    let conn = Arc::clone(&socket);
    let worker = thread::Builder::new()
        .name("v4worker".to_string())
        .spawn(move || {
            v4::v4_worker(
                conn.as_ref(),
                &pool,
                &config,
                notifier.as_ref(),
                Interface::by_index,
            )
        })?;

    match worker.join() {
        Ok(Ok(())) => Ok(()),
        // a closed transport is how a signal stops the worker
        Ok(Err(e)) if socket.is_closed() => {
            info!("worker stopped: {e}");
            Ok(())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err("v4worker panicked".into()),
    }
}
