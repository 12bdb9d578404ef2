//! Identifier generation.

use rand::Rng;

use mesh_proto::limits::CHIDLEN;

use super::ids::{Sid, Uid};

const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generates TS6 user IDs: the local SID plus six base36 characters.
///
/// The counter lives on the core task, so a plain integer is enough.
#[derive(Debug)]
pub struct UidGenerator {
    sid: Sid,
    counter: u64,
}

impl UidGenerator {
    /// Generator for the given local SID.
    pub fn new(sid: Sid) -> Self {
        Self { sid, counter: 0 }
    }

    /// The next unused UID.
    pub fn next_uid(&mut self) -> Uid {
        let n = self.counter;
        self.counter += 1;
        Uid::new(format!("{}{}", self.sid, base36_encode_6(n)))
    }
}

fn base36_encode_6(mut n: u64) -> String {
    let mut out = [b'A'; 6];
    for slot in out.iter_mut().rev() {
        *slot = CHARS[(n % 36) as usize];
        n /= 36;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Generate the CHIDLEN-character ID segment of a fresh `!`-channel name.
pub fn generate_chid() -> String {
    let mut rng = rand::thread_rng();
    (0..CHIDLEN)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uids_are_sequential() {
        let mut generator = UidGenerator::new(Sid::new("001"));
        assert_eq!(generator.next_uid().as_str(), "001AAAAAA");
        assert_eq!(generator.next_uid().as_str(), "001AAAAAB");
        assert_eq!(generator.next_uid().as_str(), "001AAAAAC");
    }

    #[test]
    fn base36_carries() {
        assert_eq!(base36_encode_6(35), "AAAAA9");
        assert_eq!(base36_encode_6(36), "AAAABA");
    }

    #[test]
    fn chid_has_fixed_length() {
        let id = generate_chid();
        assert_eq!(id.len(), CHIDLEN);
        assert!(id.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
    }
}
