//! Channel mode state, rendering and diffing.
//!
//! Simple modes are one bit each. `r` doubles as reop-eligible and
//! registered-only, the way the original wire protocol defined it; the
//! two meanings are never separable on the wire.

use mesh_proto::limits::{KEYLEN, MAXMODEPARAMS, MAX_PAYLOAD};

/// Bitset of the simple channel modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeFlags(u16);

impl ModeFlags {
    /// `i` — invite-only.
    pub const INVITE_ONLY: ModeFlags = ModeFlags(0x0001);
    /// `n` — no external messages.
    pub const NO_EXTERNAL: ModeFlags = ModeFlags(0x0002);
    /// `p` — private.
    pub const PRIVATE: ModeFlags = ModeFlags(0x0004);
    /// `s` — secret.
    pub const SECRET: ModeFlags = ModeFlags(0x0008);
    /// `m` — moderated.
    pub const MODERATED: ModeFlags = ModeFlags(0x0010);
    /// `t` — topic settable by chanops only.
    pub const TOPIC_LIMIT: ModeFlags = ModeFlags(0x0020);
    /// `r` — reop-eligible / registered-only.
    pub const REOP: ModeFlags = ModeFlags(0x0040);
    /// `a` — anonymous.
    pub const ANONYMOUS: ModeFlags = ModeFlags(0x0080);
    /// `S` — secure transports only.
    pub const SSL_ONLY: ModeFlags = ModeFlags(0x0100);

    /// Letters in canonical render order.
    pub const TABLE: [(char, ModeFlags); 9] = [
        ('n', ModeFlags::NO_EXTERNAL),
        ('t', ModeFlags::TOPIC_LIMIT),
        ('s', ModeFlags::SECRET),
        ('m', ModeFlags::MODERATED),
        ('i', ModeFlags::INVITE_ONLY),
        ('p', ModeFlags::PRIVATE),
        ('r', ModeFlags::REOP),
        ('a', ModeFlags::ANONYMOUS),
        ('S', ModeFlags::SSL_ONLY),
    ];

    /// The empty set.
    pub fn empty() -> ModeFlags {
        ModeFlags(0)
    }

    /// Whether every bit of `other` is set.
    pub fn contains(self, other: ModeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set bits.
    pub fn insert(&mut self, other: ModeFlags) {
        self.0 |= other.0;
    }

    /// Clear bits.
    pub fn remove(&mut self, other: ModeFlags) {
        self.0 &= !other.0;
    }

    /// Bitwise union.
    pub fn union(self, other: ModeFlags) -> ModeFlags {
        ModeFlags(self.0 | other.0)
    }

    /// No bits set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Map a simple mode letter to its bit.
    pub fn from_letter(c: char) -> Option<ModeFlags> {
        Self::TABLE.iter().find(|(l, _)| *l == c).map(|(_, f)| *f)
    }
}

/// Complete mode state of a channel: simple flags plus key and limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modes {
    /// Simple mode bits.
    pub flags: ModeFlags,
    /// Member limit; zero means unset.
    pub limit: u32,
    /// Channel key; empty means unset.
    pub key: String,
}

impl Modes {
    /// No modes at all.
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty() && self.limit == 0 && self.key.is_empty()
    }

    /// Render as a wire mode string, `+` first.
    ///
    /// Key and limit arguments are appended only when `show_args` is set;
    /// non-members see the letters alone.
    pub fn render(&self, show_args: bool) -> String {
        let mut letters = String::from("+");
        let mut args = String::new();
        for (letter, flag) in ModeFlags::TABLE {
            if self.flags.contains(flag) {
                letters.push(letter);
            }
        }
        if self.limit > 0 {
            letters.push('l');
            if show_args {
                args.push(' ');
                args.push_str(&self.limit.to_string());
            }
        }
        if !self.key.is_empty() {
            letters.push('k');
            if show_args {
                args.push(' ');
                args.push_str(&self.key);
            }
        }
        letters + &args
    }
}

/// Build a `Modes` from an SJOIN mode string plus its positional
/// arguments. Returns `None` when the string consumes arguments that are
/// not there; the caller drops the whole SJOIN in that case.
pub fn parse_sjoin_modes(modes: &str, args: &[String]) -> Option<Modes> {
    let mut out = Modes::default();
    if modes == "0" {
        return Some(out);
    }
    let mut next_arg = 0;
    for c in modes.chars() {
        match c {
            '+' => {}
            'k' => {
                let key = args.get(next_arg)?;
                next_arg += 1;
                out.key = key.chars().take(KEYLEN).collect();
            }
            'l' => {
                let arg = args.get(next_arg)?;
                next_arg += 1;
                out.limit = arg.parse().unwrap_or(0);
            }
            _ => {
                if let Some(flag) = ModeFlags::from_letter(c) {
                    out.flags.insert(flag);
                }
            }
        }
    }
    Some(out)
}

/// One elementary mode change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    /// `+` or `-`.
    pub add: bool,
    /// Mode letter.
    pub letter: char,
    /// Argument, for `k`, `l` and status changes.
    pub arg: Option<String>,
}

/// The minimal `+/-` sequence taking `old` to `new`.
pub fn mode_diff(old: &Modes, new: &Modes) -> Vec<ModeChange> {
    let mut changes = Vec::new();
    for (letter, flag) in ModeFlags::TABLE {
        if new.flags.contains(flag) && !old.flags.contains(flag) {
            changes.push(ModeChange {
                add: true,
                letter,
                arg: None,
            });
        }
    }
    for (letter, flag) in ModeFlags::TABLE {
        if old.flags.contains(flag) && !new.flags.contains(flag) {
            changes.push(ModeChange {
                add: false,
                letter,
                arg: None,
            });
        }
    }
    if old.limit > 0 && new.limit == 0 {
        changes.push(ModeChange {
            add: false,
            letter: 'l',
            arg: None,
        });
    }
    if !old.key.is_empty() && new.key.is_empty() {
        changes.push(ModeChange {
            add: false,
            letter: 'k',
            arg: Some(old.key.clone()),
        });
    }
    if new.limit > 0 && old.limit != new.limit {
        changes.push(ModeChange {
            add: true,
            letter: 'l',
            arg: Some(new.limit.to_string()),
        });
    }
    if !new.key.is_empty() && old.key != new.key {
        changes.push(ModeChange {
            add: true,
            letter: 'k',
            arg: Some(new.key.clone()),
        });
    }
    changes
}

/// Accumulates mode changes into `:<src> MODE <target> ...` lines.
///
/// Starts a fresh line whenever a change would push past MAXMODEPARAMS
/// parameter-bearing letters or past the wire payload limit, preserving
/// the current direction sign on the new line.
pub struct ModeLineBuilder {
    header: String,
    dir: Option<bool>,
    letters: String,
    args: Vec<String>,
    params: usize,
    lines: Vec<String>,
}

impl ModeLineBuilder {
    /// Builder emitting lines from `source` about `target`.
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            header: format!(":{source} MODE {target} "),
            dir: None,
            letters: String::new(),
            args: Vec::new(),
            params: 0,
            lines: Vec::new(),
        }
    }

    fn current_len(&self) -> usize {
        self.header.len()
            + self.letters.len()
            + self.args.iter().map(|a| a.len() + 1).sum::<usize>()
    }

    /// Append one change, flushing first if it would not fit.
    pub fn push(&mut self, add: bool, letter: char, arg: Option<&str>) {
        if arg.is_some()
            && (self.params >= MAXMODEPARAMS
                || self.current_len() + arg.map_or(0, |a| a.len() + 3) > MAX_PAYLOAD)
        {
            self.flush();
        }
        if self.dir != Some(add) {
            self.letters.push(if add { '+' } else { '-' });
            self.dir = Some(add);
        }
        self.letters.push(letter);
        if let Some(arg) = arg {
            self.args.push(arg.to_owned());
            self.params += 1;
        }
    }

    /// Append a whole diff.
    pub fn push_all(&mut self, changes: &[ModeChange]) {
        for c in changes {
            self.push(c.add, c.letter, c.arg.as_deref());
        }
    }

    /// Emit the pending line, if any.
    pub fn flush(&mut self) {
        if self.letters.is_empty() {
            return;
        }
        let mut line = self.header.clone();
        line.push_str(&self.letters);
        for a in &self.args {
            line.push(' ');
            line.push_str(a);
        }
        self.lines.push(line);
        self.letters.clear();
        self.args.clear();
        self.params = 0;
        self.dir = None;
    }

    /// Flush and return every emitted line.
    pub fn finish(mut self) -> Vec<String> {
        self.flush();
        self.lines
    }
}
