//! Client-sessions slot table.
//!
//! One slot per client: the session number and the header of the last reply
//! sent to that client. Serialized as the client-sessions trailer, one
//! fixed-size entry per slot; a zero session number marks a vacant slot and
//! its entry is all zeros.

use basalt_error::{BasaltError, Result};
use basalt_schema::{Command, Header, HEADER_SIZE};
use basalt_types::limits::{CLIENT_SESSION_ENTRY_SIZE, REPLY_SLOTS_MAX};

/// One client-session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Session number; 0 iff the slot is vacant.
    pub session: u64,
    /// Header of the retained reply; `None` iff the slot is vacant.
    pub header: Option<Header>,
}

impl Slot {
    const VACANT: Self = Self {
        session: 0,
        header: None,
    };

    /// Whether this slot holds a session.
    #[must_use]
    pub const fn is_occupied(&self) -> bool {
        self.session != 0
    }
}

/// The full slot table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSessions {
    slots: Vec<Slot>,
}

impl ClientSessions {
    /// Create a table of vacant slots.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::VACANT; REPLY_SLOTS_MAX],
        }
    }

    /// Install a session and its retained reply header into `slot`.
    pub fn set(&mut self, slot: usize, session: u64, header: Header) -> Result<()> {
        if slot >= self.slots.len() {
            return Err(BasaltError::SlotOutOfRange {
                slot,
                max: self.slots.len(),
            });
        }
        if session == 0 {
            return Err(BasaltError::client_sessions_corrupt(
                "session number 0 marks a vacant slot".to_owned(),
            ));
        }
        if header.command != Command::Reply {
            return Err(BasaltError::client_sessions_corrupt(format!(
                "slot {slot} header must be a reply, got {:?}",
                header.command
            )));
        }
        self.slots[slot] = Slot {
            session,
            header: Some(header),
        };
        Ok(())
    }

    /// Evict `slot`, leaving it vacant.
    pub fn evict(&mut self, slot: usize) -> Result<()> {
        if slot >= self.slots.len() {
            return Err(BasaltError::SlotOutOfRange {
                slot,
                max: self.slots.len(),
            });
        }
        self.slots[slot] = Slot::VACANT;
        Ok(())
    }

    /// Iterate slots in natural slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Slot)> {
        self.slots.iter().enumerate()
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_occupied()).count()
    }

    /// Serialize to the trailer form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.slots.len() * CLIENT_SESSION_ENTRY_SIZE);
        for slot in &self.slots {
            out.extend_from_slice(&slot.session.to_le_bytes());
            match &slot.header {
                Some(header) => out.extend_from_slice(&header.to_bytes()),
                None => out.extend_from_slice(&[0_u8; HEADER_SIZE]),
            }
        }
        out
    }

    /// Decode a trailer buffer into a new table.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let expected = REPLY_SLOTS_MAX * CLIENT_SESSION_ENTRY_SIZE;
        if bytes.len() != expected {
            return Err(BasaltError::client_sessions_corrupt(format!(
                "trailer length {} != {expected}",
                bytes.len()
            )));
        }
        let mut slots = Vec::with_capacity(REPLY_SLOTS_MAX);
        for (index, entry) in bytes.chunks_exact(CLIENT_SESSION_ENTRY_SIZE).enumerate() {
            let mut raw = [0_u8; 8];
            raw.copy_from_slice(&entry[..8]);
            let session = u64::from_le_bytes(raw);
            if session == 0 {
                if entry[8..].iter().any(|&b| b != 0) {
                    return Err(BasaltError::client_sessions_corrupt(format!(
                        "vacant slot {index} has a nonzero header"
                    )));
                }
                slots.push(Slot::VACANT);
                continue;
            }
            let header = Header::from_bytes(&entry[8..])?;
            if header.command != Command::Reply {
                return Err(BasaltError::client_sessions_corrupt(format!(
                    "slot {index} header must be a reply, got {:?}",
                    header.command
                )));
            }
            slots.push(Slot {
                session,
                header: Some(header),
            });
        }
        Ok(Self { slots })
    }
}

impl Default for ClientSessions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vacant_table_round_trip() {
        let table = ClientSessions::new();
        assert_eq!(table.occupied(), 0);
        let decoded = ClientSessions::decode(&table.encode()).expect("trailer should decode");
        assert_eq!(decoded, table);
    }

    #[test]
    fn occupied_slots_round_trip() {
        let mut table = ClientSessions::new();
        let header = Header::for_reply(9, 1024, b"payload");
        table.set(3, 777, header).expect("set should succeed");
        table
            .set(5, 888, Header::for_reply(11, 2048, &[]))
            .expect("set should succeed");
        assert_eq!(table.occupied(), 2);

        let decoded = ClientSessions::decode(&table.encode()).expect("trailer should decode");
        assert_eq!(decoded, table);
        let (_, slot) = decoded.iter().nth(3).expect("slot 3 exists");
        assert_eq!(slot.session, 777);
        assert_eq!(slot.header, Some(header));
    }

    #[test]
    fn evict_leaves_slot_vacant() {
        let mut table = ClientSessions::new();
        table
            .set(0, 5, Header::for_reply(1, 1, b"x"))
            .expect("set should succeed");
        table.evict(0).expect("evict should succeed");
        assert_eq!(table.occupied(), 0);
        assert_eq!(table, ClientSessions::new());
    }

    #[test]
    fn reject_zero_session() {
        let mut table = ClientSessions::new();
        assert!(table.set(0, 0, Header::for_reply(1, 1, b"x")).is_err());
    }

    #[test]
    fn reject_non_reply_header() {
        let mut table = ClientSessions::new();
        assert!(table.set(0, 5, Header::for_block(1, b"x")).is_err());
    }

    #[test]
    fn reject_truncated_trailer() {
        let table = ClientSessions::new();
        let mut bytes = table.encode();
        bytes.pop();
        assert!(ClientSessions::decode(&bytes).is_err());
    }

    #[test]
    fn reject_vacant_slot_with_header_bytes() {
        let table = ClientSessions::new();
        let mut bytes = table.encode();
        // Slot 0 stays vacant (session 0) but carries header residue.
        bytes[20] = 1;
        assert!(ClientSessions::decode(&bytes).is_err());
    }
}
