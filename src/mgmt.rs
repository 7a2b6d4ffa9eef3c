use std::io::{BufRead, BufReader, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::leasedb::LeasePool;

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "command")]
pub enum MgmtRequest {
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "leases")]
    Leases,
    #[serde(rename = "release")]
    Release { address: Ipv4Addr },
}

#[derive(Debug, Default, Serialize)]
pub struct MgmtResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leases: Option<Vec<Ipv4Addr>>,
}

#[derive(Debug, Serialize)]
pub struct PoolStatus {
    pub begin: Ipv4Addr,
    pub end: Ipv4Addr,
    pub capacity: u64,
    pub leased: usize,
    pub boot_filename: String,
}

/// Main management listener loop
pub fn listener(listener: TcpListener, pool: Arc<LeasePool>, config: Arc<ArcSwap<Config>>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let peer = stream.peer_addr().ok();
                handle_client(stream, &pool, &config);
                if let Some(addr) = peer {
                    info!(%addr, "handled management request");
                }
            }
            Err(e) => {
                warn!(%e, "failed to accept management connection");
            }
        }
    }
}

fn handle_client(stream: TcpStream, pool: &LeasePool, config: &ArcSwap<Config>) {
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok();
    stream.set_write_timeout(Some(Duration::from_secs(5))).ok();

    let mut reader = BufReader::new(&stream);
    let mut line = String::new();

    match reader.read_line(&mut line) {
        Ok(0) => return, // EOF
        Ok(_) => {}
        Err(e) => {
            warn!(%e, "failed to read from management client");
            return;
        }
    }

    let response = respond(&line, pool, &config.load());

    let mut writer = stream;
    if let Err(e) = serde_json::to_writer(&mut writer, &response) {
        warn!(%e, "failed to write response");
    }
    let _ = writer.write_all(b"\n");
}

/// Answer one request line
pub fn respond(line: &str, pool: &LeasePool, config: &Config) -> MgmtResponse {
    match serde_json::from_str::<MgmtRequest>(line) {
        Ok(MgmtRequest::Status) => MgmtResponse {
            success: true,
            message: Some("Status OK".into()),
            pool: Some(PoolStatus {
                begin: pool.begin(),
                end: pool.end(),
                capacity: pool.capacity(),
                leased: pool.leased_count(),
                boot_filename: config.boot.boot_filename.clone(),
            }),
            ..Default::default()
        },
        Ok(MgmtRequest::Leases) => MgmtResponse {
            success: true,
            leases: Some(pool.leased()),
            ..Default::default()
        },
        Ok(MgmtRequest::Release { address }) => {
            if pool.release(address) {
                info!(%address, "released address via management socket");
                MgmtResponse {
                    success: true,
                    message: Some(format!("Released {address}")),
                    ..Default::default()
                }
            } else {
                MgmtResponse {
                    success: false,
                    error: Some(format!("{address} is not leased")),
                    ..Default::default()
                }
            }
        }
        Err(e) => MgmtResponse {
            success: false,
            error: Some(format!("Invalid request: {}", e)),
            ..Default::default()
        },
    }
}
