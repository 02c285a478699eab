#![no_std]

use core::fmt;
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use serde::{Deserialize, Serialize};

const CONFIG_MAGIC: [u8; 16] = [
    b'e', b'm', b'b', b'h', b't', b't', b'p', b'-', b'c', b'o', b'n', b'f', b'i', b'g', b'v', b'1',
];

// magic followed by a little endian u32 holding the json length
const HEADER_LEN: usize = CONFIG_MAGIC.len() + 4;
const MAX_JSON_LEN: usize = 240;
const RECORD_LEN: usize = 512;

pub const DEFAULT_REQUEST_BUFFER_SIZE: usize = 1024;
pub const MIN_REQUEST_BUFFER_SIZE: usize = 256;
pub const MAX_REQUEST_BUFFER_SIZE: usize = 16384;

pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;
pub const MIN_EVENT_BUFFER_SIZE: usize = 64;
pub const MAX_EVENT_BUFFER_SIZE: usize = 4096;

#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    Storage(&'static str),
    Missing,
    Corrupt,
    Invalid(&'static str),
    Json(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {}", e),
            Self::Missing => f.write_str("no config exists"),
            Self::Corrupt => f.write_str("config corrupt"),
            Self::Invalid(e) => write!(f, "invalid config: {}", e),
            Self::Json(e) => write!(f, "config json error: {}", e),
        }
    }
}

/// Server tunables.
///
/// Stored on flash as JSON behind a magic header so that a device can change
/// them at runtime (see [`ServerConfig::update`]) and keep them over a reboot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default)]
pub struct ServerConfig {
    /// Adds `access-control-allow-origin: *` to every response.
    pub enable_cors: bool,
    /// Size of the buffer a request head (and any leading body bytes) is read into.
    pub request_buffer_size: usize,
    /// Scratch space for serializing a single server-sent event.
    pub event_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enable_cors: true,
            request_buffer_size: DEFAULT_REQUEST_BUFFER_SIZE,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn from_json(data: &[u8]) -> Result<Self, ConfigError> {
        let (config, _) = serde_json_core::from_slice::<ServerConfig>(data)
            .or(Err(ConfigError::Json("could not parse server config")))?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self, dst: &mut [u8]) -> Result<usize, ConfigError> {
        serde_json_core::to_slice(self, dst).or(Err(ConfigError::Json("buffer too small")))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_REQUEST_BUFFER_SIZE..=MAX_REQUEST_BUFFER_SIZE).contains(&self.request_buffer_size)
        {
            return Err(ConfigError::Invalid("request_buffer_size out of range"));
        }

        if !(MIN_EVENT_BUFFER_SIZE..=MAX_EVENT_BUFFER_SIZE).contains(&self.event_buffer_size) {
            return Err(ConfigError::Invalid("event_buffer_size out of range"));
        }

        Ok(())
    }

    /// Applies the fields present in `update`. The config is left untouched if
    /// the result would not validate.
    pub fn update(&mut self, update: &ServerConfigUpdate) -> Result<(), ConfigError> {
        let mut updated = *self;

        if let Some(value) = update.enable_cors {
            updated.enable_cors = value;
        }
        if let Some(value) = update.request_buffer_size {
            updated.request_buffer_size = value;
        }
        if let Some(value) = update.event_buffer_size {
            updated.event_buffer_size = value;
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }

    pub fn load<S: ReadNorFlash>(src: &mut S) -> Result<Self, ConfigError> {
        if src.capacity() < RECORD_LEN {
            return Err(ConfigError::Storage("storage too small for config"));
        }

        let mut read_buf = [0u8; RECORD_LEN];
        if src.read(0, &mut read_buf[..]).is_err() {
            return Err(ConfigError::Storage("error reading config from storage"));
        }

        if read_buf[..CONFIG_MAGIC.len()] != CONFIG_MAGIC[..] {
            return Err(ConfigError::Missing);
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&read_buf[CONFIG_MAGIC.len()..HEADER_LEN]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len == 0 || len > MAX_JSON_LEN {
            return Err(ConfigError::Corrupt);
        }

        Self::from_json(&read_buf[HEADER_LEN..HEADER_LEN + len])
    }

    pub fn save<S: NorFlash>(&self, dst: &mut S) -> Result<(), ConfigError> {
        self.validate()?;

        let mut write_buf = [0u8; RECORD_LEN];
        write_buf[..CONFIG_MAGIC.len()].copy_from_slice(&CONFIG_MAGIC);

        let len = self.to_json(&mut write_buf[HEADER_LEN..HEADER_LEN + MAX_JSON_LEN])?;
        write_buf[CONFIG_MAGIC.len()..HEADER_LEN].copy_from_slice(&(len as u32).to_le_bytes());

        // writes must be a multiple of the flash word size
        let write_len = (HEADER_LEN + len).div_ceil(S::WRITE_SIZE) * S::WRITE_SIZE;
        if write_len > RECORD_LEN {
            return Err(ConfigError::Storage("flash write size too large"));
        }

        let erase_len = RECORD_LEN.div_ceil(S::ERASE_SIZE) * S::ERASE_SIZE;
        if dst.erase(0, erase_len as u32).is_err() {
            return Err(ConfigError::Storage("error erasing flash prior to write"));
        }
        if dst.write(0, &write_buf[..write_len]).is_err() {
            return Err(ConfigError::Storage("error writing to storage"));
        }

        Ok(())
    }
}

/// A partial config, as received from a client. Only present fields are applied.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfigUpdate {
    pub enable_cors: Option<bool>,
    pub request_buffer_size: Option<usize>,
    pub event_buffer_size: Option<usize>,
}

impl ServerConfigUpdate {
    pub fn from_json(data: &[u8]) -> Result<Self, ConfigError> {
        serde_json_core::from_slice::<ServerConfigUpdate>(data)
            .map(|(update, _)| update)
            .or(Err(ConfigError::Json("could not parse config update")))
    }
}
