//! Peer settings carried by SETTINGS frames.

/// Default initial window size, also used when the peer never sends one.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 64 * 1024;

/// SETTINGS identifiers
pub mod settings_id {
    pub const UPLOAD_BANDWIDTH: u32 = 0x1;
    pub const DOWNLOAD_BANDWIDTH: u32 = 0x2;
    pub const ROUND_TRIP_TIME: u32 = 0x3;
    pub const MAX_CONCURRENT_STREAMS: u32 = 0x4;
    pub const CURRENT_CWND: u32 = 0x5;
    pub const DOWNLOAD_RETRANS_RATE: u32 = 0x6;
    pub const INITIAL_WINDOW_SIZE: u32 = 0x7;
    pub const CLIENT_CERTIFICATE_VECTOR_SIZE: u32 = 0x8;
}

/// Per-entry SETTINGS flags
pub mod settings_flags {
    /// Sender asks the receiver to persist this value.
    pub const PERSIST_VALUE: u8 = 0x1;
    /// Value was persisted earlier and is being returned.
    pub const PERSISTED: u8 = 0x2;
}

/// Number of slots; ids at or above this are dropped.
const COUNT: usize = 10;

/// A sparse table of setting id to (flags, value).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    set: u32,
    persist_value: u32,
    persisted: u32,
    values: [u32; COUNT],
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` for `id`. Ids outside the known range are ignored.
    pub fn set(&mut self, id: u32, flags: u8, value: u32) -> &mut Self {
        let Some(slot) = slot(id) else {
            return self;
        };
        let bit = 1u32 << slot;
        self.set |= bit;
        if flags & settings_flags::PERSIST_VALUE != 0 {
            self.persist_value |= bit;
        } else {
            self.persist_value &= !bit;
        }
        if flags & settings_flags::PERSISTED != 0 {
            self.persisted |= bit;
        } else {
            self.persisted &= !bit;
        }
        self.values[slot] = value;
        self
    }

    pub fn is_set(&self, id: u32) -> bool {
        slot(id).map_or(false, |slot| self.set & (1 << slot) != 0)
    }

    pub fn get(&self, id: u32) -> Option<u32> {
        match self.is_set(id) {
            true => Some(self.values[id as usize]),
            false => None,
        }
    }

    /// Entry flags as they appear on the wire.
    pub fn flags(&self, id: u32) -> u8 {
        let mut result = 0;
        if self.is_persisted(id) {
            result |= settings_flags::PERSISTED;
        }
        if self.persist_value(id) {
            result |= settings_flags::PERSIST_VALUE;
        }
        result
    }

    pub fn persist_value(&self, id: u32) -> bool {
        slot(id).map_or(false, |slot| self.persist_value & (1 << slot) != 0)
    }

    pub fn is_persisted(&self, id: u32) -> bool {
        slot(id).map_or(false, |slot| self.persisted & (1 << slot) != 0)
    }

    /// Number of entries that are set.
    pub fn len(&self) -> usize {
        self.set.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.set == 0
    }

    /// `(id, flags, value)` for every set entry in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u8, u32)> + '_ {
        (0..COUNT as u32)
            .filter(|id| self.is_set(*id))
            .map(|id| (id, self.flags(id), self.values[id as usize]))
    }

    /// Overlay every entry set in `other` onto `self`.
    pub fn merge(&mut self, other: &Settings) {
        for (id, flags, value) in other.iter() {
            self.set(id, flags, value);
        }
    }

    pub fn upload_bandwidth(&self, default: u32) -> u32 {
        self.get(settings_id::UPLOAD_BANDWIDTH).unwrap_or(default)
    }

    pub fn download_bandwidth(&self, default: u32) -> u32 {
        self.get(settings_id::DOWNLOAD_BANDWIDTH).unwrap_or(default)
    }

    pub fn round_trip_time(&self, default: u32) -> u32 {
        self.get(settings_id::ROUND_TRIP_TIME).unwrap_or(default)
    }

    pub fn max_concurrent_streams(&self, default: u32) -> u32 {
        self.get(settings_id::MAX_CONCURRENT_STREAMS)
            .unwrap_or(default)
    }

    pub fn current_cwnd(&self, default: u32) -> u32 {
        self.get(settings_id::CURRENT_CWND).unwrap_or(default)
    }

    pub fn download_retrans_rate(&self, default: u32) -> u32 {
        self.get(settings_id::DOWNLOAD_RETRANS_RATE)
            .unwrap_or(default)
    }

    pub fn initial_window_size(&self) -> u32 {
        self.get(settings_id::INITIAL_WINDOW_SIZE)
            .unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    pub fn client_certificate_vector_size(&self, default: u32) -> u32 {
        self.get(settings_id::CLIENT_CERTIFICATE_VECTOR_SIZE)
            .unwrap_or(default)
    }
}

fn slot(id: u32) -> Option<usize> {
    ((id as usize) < COUNT).then_some(id as usize)
}
