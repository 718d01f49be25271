/*! Configuration types.

Every knob the stack recognises lives here, with its default. The
structs derive `serde` traits so a front end can deserialize them from
whatever format it likes; actually reading config files is that front
end's job, not this crate's.
*/
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// AX.25 protocol revision a station runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AX25Version {
    /// AX.25 2.0: no XID, no SABME, 8-bit control fields only.
    #[serde(rename = "AX25_20")]
    Ax25_20,
    /// AX.25 2.2.
    #[serde(rename = "AX25_22")]
    Ax25_22,
}

fn default_max_ifield() -> u32 {
    256
}
fn default_max_retries() -> u32 {
    10
}
fn default_max_outstanding_mod8() -> u8 {
    7
}
fn default_max_outstanding_mod128() -> u8 {
    127
}
fn default_idle_timeout() -> Duration {
    Duration::from_secs(900)
}
fn default_rr_delay() -> Duration {
    Duration::from_secs(10)
}
fn default_rr_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_rnr_interval() -> Duration {
    Duration::from_secs(10)
}
fn default_ack_timeout() -> Duration {
    Duration::from_secs(3)
}
fn default_protocol() -> AX25Version {
    AX25Version::Ax25_22
}

/// Per-station options (AX.25 2.2 §6.7.2 parameters and timers).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StationConfig {
    /// Station callsign.
    pub callsign: String,
    /// Station SSID.
    #[serde(default)]
    pub ssid: u8,
    /// Largest I field accepted, in octets (N1).
    #[serde(default = "default_max_ifield")]
    pub max_ifield: u32,
    /// Retry limit (N2).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Window size k for modulo-8 connections.
    #[serde(default = "default_max_outstanding_mod8")]
    pub max_outstanding_mod8: u8,
    /// Window size k for modulo-128 connections.
    #[serde(default = "default_max_outstanding_mod128")]
    pub max_outstanding_mod128: u8,
    /// Idle time before a peer is forgotten.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: Duration,
    /// Delay between accepting an I frame and acknowledging with RR.
    #[serde(default = "default_rr_delay")]
    pub rr_delay: Duration,
    /// Poll interval while the peer reports busy.
    #[serde(default = "default_rr_interval")]
    pub rr_interval: Duration,
    /// Minimum spacing of RNR notifications while locally busy.
    #[serde(default = "default_rnr_interval")]
    pub rnr_interval: Duration,
    /// Wait-for-acknowledge timer (T1).
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout: Duration,
    /// Protocol revision this station speaks.
    #[serde(default = "default_protocol")]
    pub protocol: AX25Version,
}

impl StationConfig {
    /// A configuration with every option at its default.
    pub fn new(callsign: &str, ssid: u8) -> Self {
        Self {
            callsign: callsign.to_string(),
            ssid,
            max_ifield: default_max_ifield(),
            max_retries: default_max_retries(),
            max_outstanding_mod8: default_max_outstanding_mod8(),
            max_outstanding_mod128: default_max_outstanding_mod128(),
            idle_timeout: default_idle_timeout(),
            rr_delay: default_rr_delay(),
            rr_interval: default_rr_interval(),
            rnr_interval: default_rnr_interval(),
            ack_timeout: default_ack_timeout(),
            protocol: default_protocol(),
        }
    }
}

/// One destination pattern an APRS interface listens on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListenSpec {
    /// Literal callsign, or a regular expression when `regex` is set.
    pub callsign: String,
    /// Whether `callsign` is a regular expression.
    #[serde(default)]
    pub regex: bool,
    /// Restrict to one SSID; `None` matches all SSIDs.
    #[serde(default)]
    pub ssid: Option<u8>,
}

impl ListenSpec {
    /// A literal callsign+SSID pattern.
    pub fn literal(callsign: &str, ssid: Option<u8>) -> Self {
        Self {
            callsign: callsign.to_string(),
            regex: false,
            ssid,
        }
    }

    /// A regex pattern over the callsign, any SSID.
    pub fn pattern(re: &str) -> Self {
        Self {
            callsign: re.to_string(),
            regex: true,
            ssid: None,
        }
    }
}

/// The standard APRS destinations of APRS 1.0.1 §13, plus the legacy
/// `AIR` and `ZIP` entries.
pub fn standard_listen_destinations() -> Vec<ListenSpec> {
    let mut specs: Vec<ListenSpec> = [
        "^AIR", "^ALL", "^AP", "^CQ", "^GPS", "^DF", "^DGPS", "^DRILL", "^ID", "^JAVA", "^MAIL",
        "^MICE", "^QST", "^QTH", "^RTCM", "^SKY", "^SPACE", "^SPC", "^SYM", "^TEL", "^TEST",
        "^TLM", "^WX", "^ZIP",
    ]
    .iter()
    .map(|re| ListenSpec::pattern(re))
    .collect();
    specs.push(ListenSpec::literal("BEACON", None));
    specs
}

fn default_retransmit_count() -> u32 {
    4
}
fn default_retransmit_timeout_base() -> Duration {
    Duration::from_secs(30)
}
fn default_retransmit_timeout_rand() -> Duration {
    Duration::from_secs(10)
}
fn default_retransmit_timeout_scale() -> f64 {
    1.5
}
fn default_aprs_destination() -> String {
    "APZAIO".into()
}
fn default_aprs_path() -> Vec<String> {
    vec!["WIDE1-1".into(), "WIDE2-1".into()]
}
fn default_msgid_modulo() -> u32 {
    1000
}
fn default_deduplication_expiry() -> Duration {
    Duration::from_secs(28)
}

/// Per-APRS-interface options.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AprsConfig {
    /// Confirmable-message retransmission limit.
    #[serde(default = "default_retransmit_count")]
    pub retransmit_count: u32,
    /// First retransmission timer base.
    #[serde(default = "default_retransmit_timeout_base")]
    pub retransmit_timeout_base: Duration,
    /// Uniform random addition to the first timer.
    #[serde(default = "default_retransmit_timeout_rand")]
    pub retransmit_timeout_rand: Duration,
    /// Timer multiplier applied on each retransmission.
    #[serde(default = "default_retransmit_timeout_scale")]
    pub retransmit_timeout_scale: f64,
    /// AX.25 destination used for our broadcast traffic.
    #[serde(default = "default_aprs_destination")]
    pub aprs_destination: String,
    /// Digipeater path used for our traffic.
    #[serde(default = "default_aprs_path")]
    pub aprs_path: Vec<String>,
    /// Destinations to listen on; defaults to the APRS 1.0.1 §13 set.
    #[serde(default = "standard_listen_destinations")]
    pub listen_destinations: Vec<ListenSpec>,
    /// Additional alt-net destinations.
    #[serde(default)]
    pub listen_altnets: Vec<ListenSpec>,
    /// Message IDs count modulo this base.
    #[serde(default = "default_msgid_modulo")]
    pub msgid_modulo: u32,
    /// How long a frame digest suppresses duplicates.
    #[serde(default = "default_deduplication_expiry")]
    pub deduplication_expiry: Duration,
}

impl Default for AprsConfig {
    fn default() -> Self {
        Self {
            retransmit_count: default_retransmit_count(),
            retransmit_timeout_base: default_retransmit_timeout_base(),
            retransmit_timeout_rand: default_retransmit_timeout_rand(),
            retransmit_timeout_scale: default_retransmit_timeout_scale(),
            aprs_destination: default_aprs_destination(),
            aprs_path: default_aprs_path(),
            listen_destinations: standard_listen_destinations(),
            listen_altnets: Vec::new(),
            msgid_modulo: default_msgid_modulo(),
            deduplication_expiry: default_deduplication_expiry(),
        }
    }
}

/// The byte pipe a KISS device sits behind.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// A serial TNC.
    Serial {
        /// Device path, e.g. `/dev/ttyUSB0`.
        device: String,
        /// Baud rate.
        baudrate: u32,
    },
    /// A software TNC run as a child process speaking KISS on stdio.
    Subprocess {
        /// Program and arguments.
        command: Vec<String>,
    },
    /// A network TNC.
    Tcp {
        /// Host name or address.
        host: String,
        /// TCP port.
        port: u16,
    },
}

fn default_send_block_size() -> usize {
    128
}
fn default_send_block_delay() -> Duration {
    Duration::from_millis(100)
}
fn default_reset_on_close() -> bool {
    true
}
fn default_kiss_commands() -> Vec<String> {
    vec!["INT KISS".into(), "RESET".into()]
}

/// Per-KISS-device options.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KissConfig {
    /// The underlying byte pipe.
    pub transport: TransportConfig,
    /// Bytes written to the pipe per block.
    #[serde(default = "default_send_block_size")]
    pub send_block_size: usize,
    /// Pause between blocks.
    #[serde(default = "default_send_block_delay")]
    pub send_block_delay: Duration,
    /// Send a return-from-KISS command when closing.
    #[serde(default = "default_reset_on_close")]
    pub reset_on_close: bool,
    /// TNC-mode commands that put the TNC into KISS mode on open.
    #[serde(default = "default_kiss_commands")]
    pub kiss_commands: Vec<String>,
}

impl KissConfig {
    /// A configuration with every option at its default.
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            send_block_size: default_send_block_size(),
            send_block_delay: default_send_block_delay(),
            reset_on_close: default_reset_on_close(),
            kiss_commands: default_kiss_commands(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_defaults_from_sparse_input() {
        let config: StationConfig =
            serde_json::from_str(r#"{"callsign": "VK4MSL", "ssid": 10}"#).unwrap();
        assert_eq!(config.callsign, "VK4MSL");
        assert_eq!(config.ssid, 10);
        assert_eq!(config.max_ifield, 256);
        assert_eq!(config.max_retries, 10);
        assert_eq!(config.idle_timeout, Duration::from_secs(900));
        assert_eq!(config.protocol, AX25Version::Ax25_22);
    }

    #[test]
    fn protocol_wire_names() {
        let config: StationConfig =
            serde_json::from_str(r#"{"callsign": "N0CALL", "protocol": "AX25_20"}"#).unwrap();
        assert_eq!(config.protocol, AX25Version::Ax25_20);
    }

    #[test]
    fn transport_is_tagged() {
        let config: TransportConfig = serde_json::from_str(
            r#"{"type": "serial", "device": "/dev/ttyUSB0", "baudrate": 9600}"#,
        )
        .unwrap();
        assert!(matches!(config, TransportConfig::Serial { .. }));
        let text = serde_json::to_string(&TransportConfig::Tcp {
            host: "localhost".into(),
            port: 8001,
        })
        .unwrap();
        assert!(text.contains(r#""type":"tcp""#));
    }

    #[test]
    fn aprs_defaults() {
        let config = AprsConfig::default();
        assert_eq!(config.retransmit_count, 4);
        assert_eq!(config.msgid_modulo, 1000);
        assert_eq!(config.deduplication_expiry, Duration::from_secs(28));
        assert!(
            config
                .listen_destinations
                .iter()
                .any(|spec| spec.callsign == "BEACON" && !spec.regex)
        );
        assert!(
            config
                .listen_destinations
                .iter()
                .any(|spec| spec.callsign == "^WX" && spec.regex)
        );
    }

    #[test]
    fn config_roundtrips_through_json() {
        let config = KissConfig::new(TransportConfig::Subprocess {
            command: vec!["direwolf".into(), "-t".into(), "0".into()],
        });
        let text = serde_json::to_string(&config).unwrap();
        let back: KissConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.send_block_size, config.send_block_size);
        assert_eq!(back.kiss_commands, config.kiss_commands);
        assert!(matches!(back.transport, TransportConfig::Subprocess { .. }));
    }
}
