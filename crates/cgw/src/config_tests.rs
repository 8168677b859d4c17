use super::*;
use clap::Parser;

fn parse(args: &[&str]) -> GatewayConfig {
    let mut full = vec!["cgwd"];
    full.extend_from_slice(args);
    GatewayConfig::parse_from(full)
}

#[test]
fn defaults_pass_validation() {
    let cfg = parse(&[]);
    cfg.validate().expect("defaults must be valid");
}

#[test]
fn watchdog_must_exceed_processing_timeout() {
    let cfg = parse(&["--watchdog-timeout-s", "10", "--msg-processing-timeout-s", "10"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn backoff_initial_cannot_exceed_max() {
    let cfg = parse(&["--backoff-initial-s", "500", "--backoff-max-s", "300"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_unknown_log_format() {
    let cfg = parse(&["--log-format", "xml"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn durations_convert_from_seconds_and_millis() {
    let cfg = parse(&["--watchdog-timeout-s", "60", "--storage-read-timeout-ms", "1500"]);
    assert_eq!(cfg.watchdog_timeout(), std::time::Duration::from_secs(60));
    assert_eq!(cfg.storage_read_timeout(), std::time::Duration::from_millis(1500));
}
