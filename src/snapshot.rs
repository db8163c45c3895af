//! Versioned save states.
//!
//! A snapshot is a gzip-compressed JSON envelope:
//!
//! ```json
//! { "Version": 3, "Info": "apple1 emulator snapshot", "State": { ... } }
//! ```
//!
//! `State` is the serialized [`MachineState`]. Older envelopes are upgraded
//! one version at a time by the registered [`Migration`]s before the payload
//! is decoded. Version 1 carried RAM as base64 in a top-level `RAM` field;
//! version 2 predates display calibration and the auto-type queue.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use lazy_static::lazy_static;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::cpu::CPU;
use crate::error::SnapshotError;
use crate::pia::{Display, Keyboard};

pub const CURRENT_VERSION: u32 = 3;
pub const SNAPSHOT_INFO: &str = "apple1 emulator snapshot";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    pub version: u32,
    pub info: String,
    pub state: Value,
    /// Base64 RAM image, only present in version 1.
    #[serde(rename = "RAM", default, skip_serializing_if = "Option::is_none")]
    pub ram: Option<String>,
}

/// Everything needed to rebuild a machine apart from its ROM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineState {
    pub cpu: CPU,
    pub ram: Vec<u8>,
    pub keyboard: Keyboard,
    pub display: Display,
}

/// Lifts an envelope from version `from` to `from + 1`.
#[derive(Clone, Copy)]
pub struct Migration {
    pub from: u32,
    pub upgrade: fn(Envelope) -> Result<Envelope, SnapshotError>,
}

/// Ordered migrations covering every version from the oldest supported one
/// up to `current`.
pub struct MigrationChain {
    steps: Vec<Migration>,
    current: u32,
}

impl MigrationChain {
    /// Fails if the steps leave a gap, repeat a version, or overshoot
    /// `current`.
    pub fn new(mut steps: Vec<Migration>, current: u32) -> Result<Self, SnapshotError> {
        steps.sort_by_key(|step| step.from);
        if let Some(first) = steps.first() {
            let mut expected = first.from;
            for step in &steps {
                if step.from < expected {
                    return Err(SnapshotError::Corrupt(format!(
                        "duplicate migration from version {}",
                        step.from
                    )));
                }
                if step.from > expected {
                    return Err(SnapshotError::MissingMigration(expected));
                }
                expected += 1;
            }
            if expected < current {
                return Err(SnapshotError::MissingMigration(expected));
            }
            if expected > current {
                return Err(SnapshotError::Corrupt(format!(
                    "migration from version {} goes past version {current}",
                    expected - 1
                )));
            }
        }
        Ok(MigrationChain { steps, current })
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn upgrade(&self, mut envelope: Envelope) -> Result<Envelope, SnapshotError> {
        if envelope.version > self.current {
            return Err(SnapshotError::TooNew {
                found: envelope.version,
                supported: self.current,
            });
        }
        while envelope.version < self.current {
            let step = self
                .steps
                .iter()
                .find(|step| step.from == envelope.version)
                .ok_or(SnapshotError::MissingMigration(envelope.version))?;
            debug!("migrating snapshot v{} -> v{}", step.from, step.from + 1);
            envelope = (step.upgrade)(envelope)?;
            envelope.version = step.from + 1;
        }
        Ok(envelope)
    }
}

lazy_static! {
    static ref MIGRATIONS: MigrationChain = MigrationChain::new(
        vec![
            Migration { from: 1, upgrade: ram_into_state },
            Migration { from: 2, upgrade: add_display_calibration_and_auto_type },
        ],
        CURRENT_VERSION,
    )
    .expect("snapshot migrations must reach the current version");
}

fn state_object(state: &mut Value) -> Result<&mut Map<String, Value>, SnapshotError> {
    state
        .as_object_mut()
        .ok_or_else(|| SnapshotError::Corrupt("State is not an object".to_string()))
}

fn field_object<'a>(
    state: &'a mut Map<String, Value>,
    name: &str,
) -> Result<&'a mut Map<String, Value>, SnapshotError> {
    state
        .get_mut(name)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| SnapshotError::Corrupt(format!("State.{name} is missing")))
}

/// v1 -> v2: RAM moves from the envelope into the payload.
fn ram_into_state(mut envelope: Envelope) -> Result<Envelope, SnapshotError> {
    let encoded = envelope
        .ram
        .take()
        .ok_or_else(|| SnapshotError::Corrupt("version 1 snapshot without RAM".to_string()))?;
    let ram = STANDARD.decode(encoded)?;
    state_object(&mut envelope.state)?.insert("ram".to_string(), json!(ram));
    Ok(envelope)
}

/// v2 -> v3: machines saved before calibration tracking were already
/// calibrated and had nothing left to type.
fn add_display_calibration_and_auto_type(mut envelope: Envelope) -> Result<Envelope, SnapshotError> {
    let state = state_object(&mut envelope.state)?;
    let display = field_object(state, "display")?;
    display.insert("initialized".to_string(), json!(true));
    display.insert("clear_requested".to_string(), json!(false));
    let keyboard = field_object(state, "keyboard")?;
    keyboard.insert("auto_type".to_string(), json!([]));
    Ok(envelope)
}

pub fn encode(state: &MachineState) -> Result<Vec<u8>, SnapshotError> {
    let envelope = Envelope {
        version: CURRENT_VERSION,
        info: SNAPSHOT_INFO.to_string(),
        state: serde_json::to_value(state)?,
        ram: None,
    };
    let json = serde_json::to_vec(&envelope)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let bytes = encoder.finish()?;
    info!("snapshot encoded: {} bytes ({} uncompressed)", bytes.len(), json.len());
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<MachineState, SnapshotError> {
    let mut json = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut json)?;
    let envelope: Envelope = serde_json::from_slice(&json)?;
    if envelope.info != SNAPSHOT_INFO {
        debug!("unexpected snapshot info {:?}", envelope.info);
    }

    let envelope = MIGRATIONS.upgrade(envelope)?;
    Ok(serde_json::from_value(envelope.state)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> MachineState {
        let mut cpu = CPU::new();
        cpu.a = 0x12;
        cpu.pc = 0xFF1F;
        cpu.sp = 0xFA;
        cpu.reset_pending = false;
        cpu.steps = 1234;

        let mut keyboard = Keyboard::new();
        keyboard.queue_text("E000R\n").unwrap();
        keyboard.press(b'A');

        let mut display = Display::new();
        display.write_data(0x7F);
        display.write_data(0xC2);

        let mut ram = vec![0; 0x1000];
        ram[0x0200] = 0xAB;
        ram[0x0FFF] = 0xCD;

        MachineState { cpu, ram, keyboard, display }
    }

    fn gzip_envelope(envelope: &Envelope) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&serde_json::to_vec(envelope).unwrap()).unwrap();
        encoder.finish().unwrap()
    }

    fn unpack(bytes: &[u8]) -> Envelope {
        let mut json = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut json).unwrap();
        serde_json::from_slice(&json).unwrap()
    }

    /// The current state with the fields version 2 did not have removed.
    fn v2_envelope(state: &MachineState) -> Envelope {
        let mut value = serde_json::to_value(state).unwrap();
        let object = value.as_object_mut().unwrap();
        let display = object["display"].as_object_mut().unwrap();
        display.remove("initialized");
        display.remove("clear_requested");
        object["keyboard"].as_object_mut().unwrap().remove("auto_type");
        Envelope {
            version: 2,
            info: SNAPSHOT_INFO.to_string(),
            state: value,
            ram: None,
        }
    }

    fn noop(envelope: Envelope) -> Result<Envelope, SnapshotError> {
        Ok(envelope)
    }

    #[test]
    fn test_round_trip() {
        let state = sample_state();
        let bytes = encode(&state).unwrap();
        assert_eq!(decode(&bytes).unwrap(), state);
    }

    #[test]
    fn test_envelope_layout() {
        let envelope = unpack(&encode(&sample_state()).unwrap());
        assert_eq!(envelope.version, CURRENT_VERSION);
        assert_eq!(envelope.info, SNAPSHOT_INFO);
        assert!(envelope.ram.is_none());
        assert!(envelope.state.get("cpu").is_some());

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("Version").is_some());
        assert!(json.get("State").is_some());
        assert!(json.get("RAM").is_none());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let state = sample_state();
        assert_eq!(encode(&state).unwrap(), encode(&state).unwrap());
    }

    #[test]
    fn test_too_new_rejected() {
        let mut envelope = unpack(&encode(&sample_state()).unwrap());
        envelope.version = CURRENT_VERSION + 1;
        match decode(&gzip_envelope(&envelope)) {
            Err(SnapshotError::TooNew { found, supported }) => {
                assert_eq!(found, CURRENT_VERSION + 1);
                assert_eq!(supported, CURRENT_VERSION);
            }
            other => panic!("expected TooNew, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_old_version_rejected() {
        let mut envelope = unpack(&encode(&sample_state()).unwrap());
        envelope.version = 0;
        assert!(matches!(
            decode(&gzip_envelope(&envelope)),
            Err(SnapshotError::MissingMigration(0))
        ));
    }

    #[test]
    fn test_version_2_upgrade() {
        let state = sample_state();
        let bytes = gzip_envelope(&v2_envelope(&state));
        let decoded = decode(&bytes).unwrap();

        // v2 machines were calibrated and had nothing queued
        assert!(decoded.display.is_initialized());
        assert_eq!(decoded.keyboard.auto_type_remaining(), 0);
        assert_eq!(decoded.keyboard.last_key(), b'A');
        assert!(decoded.keyboard.is_key_pending());
        assert_eq!(decoded.cpu, state.cpu);
        assert_eq!(decoded.ram, state.ram);
        assert_eq!(decoded.display.pending_output(), state.display.pending_output());
    }

    #[test]
    fn test_version_1_upgrade() {
        let state = sample_state();
        let mut envelope = v2_envelope(&state);
        envelope.version = 1;
        envelope.state.as_object_mut().unwrap().remove("ram");
        envelope.ram = Some(STANDARD.encode(&state.ram));

        let decoded = decode(&gzip_envelope(&envelope)).unwrap();
        assert_eq!(decoded.ram, state.ram);
        assert_eq!(decoded.cpu, state.cpu);
    }

    #[test]
    fn test_version_1_without_ram_is_corrupt() {
        let mut envelope = v2_envelope(&sample_state());
        envelope.version = 1;
        envelope.state.as_object_mut().unwrap().remove("ram");
        assert!(matches!(
            decode(&gzip_envelope(&envelope)),
            Err(SnapshotError::Corrupt(_))
        ));
    }

    #[test]
    fn test_version_1_bad_base64() {
        let mut envelope = v2_envelope(&sample_state());
        envelope.version = 1;
        envelope.ram = Some("not base64!".to_string());
        assert!(matches!(
            decode(&gzip_envelope(&envelope)),
            Err(SnapshotError::Base64(_))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(decode(b"definitely not gzip"), Err(SnapshotError::Io(_))));

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{\"Version\": 3").unwrap();
        let truncated = encoder.finish().unwrap();
        assert!(matches!(decode(&truncated), Err(SnapshotError::Json(_))));
    }

    #[test]
    fn test_chain_rejects_gap() {
        let steps = vec![
            Migration { from: 1, upgrade: noop },
            Migration { from: 3, upgrade: noop },
        ];
        assert!(matches!(
            MigrationChain::new(steps, 4),
            Err(SnapshotError::MissingMigration(2))
        ));
    }

    #[test]
    fn test_chain_rejects_short_coverage() {
        let steps = vec![Migration { from: 1, upgrade: noop }];
        assert!(matches!(
            MigrationChain::new(steps, 3),
            Err(SnapshotError::MissingMigration(2))
        ));
    }

    #[test]
    fn test_chain_rejects_duplicates_and_overshoot() {
        let duplicate = vec![
            Migration { from: 1, upgrade: noop },
            Migration { from: 1, upgrade: noop },
        ];
        assert!(matches!(
            MigrationChain::new(duplicate, 2),
            Err(SnapshotError::Corrupt(_))
        ));

        let overshoot = vec![Migration { from: 2, upgrade: noop }];
        assert!(matches!(
            MigrationChain::new(overshoot, 2),
            Err(SnapshotError::Corrupt(_))
        ));
    }

    #[test]
    fn test_chain_stamps_versions() {
        let steps = vec![
            Migration { from: 3, upgrade: noop },
            Migration { from: 2, upgrade: noop },
        ];
        let chain = MigrationChain::new(steps, 4).unwrap();
        assert_eq!(chain.current(), 4);

        let envelope = Envelope {
            version: 2,
            info: String::new(),
            state: json!({}),
            ram: None,
        };
        assert_eq!(chain.upgrade(envelope).unwrap().version, 4);
    }

    #[test]
    fn test_registered_chain_is_valid() {
        assert_eq!(MIGRATIONS.current(), CURRENT_VERSION);
    }
}
