//! Core infrastructure tests.

mod common;

use atoll::core::codec::{BincodeCodec, Codec, CodecKind, JsonCodec};
use atoll::core::config::{Config, ConfigOverrides};
use atoll::core::error::{AtollError, ErrorKind};
use atoll::core::time::{LogicalClock, Tick};
use atoll::resources::MapOp;
use atoll::substrate::host::LogEntry;
use atoll::substrate::session::SessionId;
use common::{bytes, create_config};

// ============================================================================
// Config tests
// ============================================================================

#[test]
fn parse_full_config() {
    let file = create_config(
        r#"
[telemetry]
log_level = "debug"

[sessions]
timeout_ms = 5000

[codec]
kind = "bincode"
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.telemetry.log_level, "debug");
    assert_eq!(config.sessions.timeout_ms, 5000);
    assert_eq!(config.codec.kind, CodecKind::Bincode);
}

#[test]
fn missing_sections_use_defaults() {
    let file = create_config("[sessions]\n");
    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.telemetry.log_level, "info");
    assert_eq!(config.sessions.timeout_ms, 0);
    assert_eq!(config.codec.kind, CodecKind::Json);
}

#[test]
fn validate_invalid_log_level() {
    let file = create_config("[telemetry]\nlog_level = \"loud\"\n");
    let result = Config::from_file(file.path());
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("log_level"));
}

#[test]
fn reject_unknown_codec() {
    let file = create_config("[codec]\nkind = \"bson\"\n");
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn missing_file_is_an_error() {
    let result = Config::from_file(std::path::Path::new("/nonexistent/atoll.toml"));
    assert!(result.unwrap_err().to_string().contains("failed to read"));
}

#[test]
fn overrides_replace_log_level() {
    let mut config = Config::default();
    config.apply_overrides(&ConfigOverrides {
        log_level: Some("trace".to_string()),
    });
    assert_eq!(config.telemetry.log_level, "trace");
    assert!(config.validate().is_ok());
}

#[test]
fn rendered_config_parses_back() {
    let mut config = Config::default();
    config.sessions.timeout_ms = 750;
    let rendered = config.to_toml().unwrap();
    let parsed = Config::from_toml(&rendered).unwrap();
    assert_eq!(parsed.sessions.timeout_ms, 750);
}

// ============================================================================
// Time tests
// ============================================================================

#[test]
fn logical_clock_is_monotonic() {
    let mut clock = LogicalClock::default();
    assert!(clock.advance_to(Tick::new(10)));
    assert!(!clock.advance_to(Tick::new(10)));
    assert!(!clock.advance_to(Tick::new(3)));
    assert_eq!(clock.now(), Tick::new(10));
}

#[test]
fn tick_deadline_checks() {
    let deadline = Tick::new(100);
    assert!(!Tick::new(99).is_at_or_after(deadline));
    assert!(Tick::new(100).is_at_or_after(deadline));
    assert_eq!(Tick::new(40).ms_until(deadline), 60);
}

// ============================================================================
// Error tests
// ============================================================================

#[test]
fn error_kinds() {
    assert_eq!(AtollError::closed_session(3).kind(), ErrorKind::ClosedSession);
    assert_eq!(
        AtollError::serialization("bad").kind(),
        ErrorKind::Serialization
    );
    assert_eq!(
        AtollError::InvalidCounterValue { len: 3 }.kind(),
        ErrorKind::Precondition
    );
    assert_eq!(AtollError::ResourceDestroyed.kind(), ErrorKind::Internal);
    assert!(!AtollError::closed_session(3).is_retriable());
}

#[test]
fn error_messages() {
    let err = AtollError::OutOfOrder {
        index: 4,
        last_applied: 9,
    };
    assert_eq!(
        err.to_string(),
        "log index 4 is not after last applied index 9"
    );
    assert_eq!(
        AtollError::closed_session(12).to_string(),
        "session 12 is closed"
    );
}

// ============================================================================
// Codec tests
// ============================================================================

#[test]
fn json_codec_decodes_log_entries() {
    let raw = br#"{"entry":"command","index":5,"tick_ms":20,"session":2,"operation":{"op":"put","key":"a","value":"1","ttl_ms":100}}"#;
    let entry: LogEntry<MapOp> = JsonCodec.decode(raw).unwrap();
    assert_eq!(
        entry,
        LogEntry::Command {
            index: 5,
            tick_ms: 20,
            session: SessionId(2),
            operation: MapOp::Put {
                key: bytes("a"),
                value: bytes("1"),
                ttl_ms: 100,
            },
        }
    );
}

#[test]
fn codec_failure_is_serialization_error() {
    let err = JsonCodec.decode::<LogEntry<MapOp>>(b"{not json").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Serialization);

    let err = BincodeCodec.decode::<(u64, String)>(&[1, 2]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Serialization);
}

#[test]
fn codec_kind_delegates() {
    let value = (7u64, "seven".to_string());
    for kind in [CodecKind::Json, CodecKind::Bincode] {
        let encoded = kind.encode(&value).unwrap();
        let decoded: (u64, String) = kind.decode(&encoded).unwrap();
        assert_eq!(decoded, value, "codec {}", kind.name());
    }
}
