/*!
 * Tunnel Control Wire
 *
 * Line-delimited JSON messages over the authenticated control connection.
 * Clients speak first with `Login`; everything after rides the same framed
 * stream: heartbeats, dynamic service registration, and error reports.
 */

use serde::{Deserialize, Serialize};

use gatehub_common::{Error, Result};
use gatehub_domain::TunnelService;

/// Control messages exchanged between tunnel client and server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// First frame on every connection
    Login {
        token: String,
        client_id: String,
        client_name: String,
    },
    LoginResp {
        ok: bool,
        message: String,
        session_id: String,
        heartbeat_interval_secs: u64,
    },
    Heartbeat {
        session_id: String,
        seq: u64,
    },
    HeartbeatAck {
        seq: u64,
    },
    /// Dynamic service announcement
    RegisterService {
        session_id: String,
        service: TunnelService,
    },
    RegisterResp {
        ok: bool,
        message: String,
        service_name: String,
        remote_port: Option<u16>,
    },
    Error {
        code: String,
        message: String,
    },
}

/// Encode one message as a wire line (no trailing newline; the codec adds it)
pub fn encode(message: &ControlMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode one wire line
pub fn decode(line: &str) -> Result<ControlMessage> {
    serde_json::from_str(line).map_err(|e| Error::Validation(format!("bad control frame: {e}")))
}
