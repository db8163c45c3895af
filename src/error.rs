use thiserror::Error;

use crate::bus::BusFault;

pub type EmulatorResult<T> = std::result::Result<T, EmulatorError>;

/// Engine-level failures. A bus fault means the ROM and the address map
/// disagree; the machine refuses to step any further once one is raised.
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("bus fault: {0}")]
    Bus(BusFault),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("bad config file: {0}")]
    ConfigFile(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad legacy RAM payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("snapshot newer than this build supports (version {found}, supported up to {supported})")]
    TooNew { found: u32, supported: u32 },
    #[error("unsupported snapshot version {0}: no migration registered")]
    MissingMigration(u32),
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
    #[error("machine is halted on a bus fault: {0}")]
    Faulted(BusFault),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("RAM size {0:#x} must be a non-zero multiple of 0x1000 no larger than {max:#x}", max = crate::bus::RAM_LIMIT)]
    BadRamSize(usize),
    #[error("ROM image is {0} bytes, the ROM slot holds at most {max}", max = crate::bus::ROM_SIZE)]
    RomTooLarge(usize),
    #[error("auto-type text contains a character the keyboard cannot produce: {0:?}")]
    UntypeableChar(char),
}
