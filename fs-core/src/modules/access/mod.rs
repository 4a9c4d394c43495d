//! Access control for ChainFS
//!
//! Permission bits live in the low six bits of the inode flag byte: bits 5..3
//! are the owner class (`rwx`), bits 2..0 the other class. Who counts as the
//! owner is decided by [`owner_class_applies`], which consults the trust
//! groups kept in [`users::UserTable`].

pub mod users;

use std::fmt;

use crate::error::{FsError, Result};

pub use users::{UserRecord, UserTable, MAX_USERS};

/// Read permission within a class
pub const READ: u8 = 0b100;
/// Write permission within a class
pub const WRITE: u8 = 0b010;
/// Execute permission within a class
pub const EXECUTE: u8 = 0b001;

const OWNER_SHIFT: u8 = 3;
const CLASS_MASK: u8 = 0b111;

/// Permission class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    /// The owner and the users the owner trusts
    Owner,
    /// Everyone else
    Other,
}

impl Class {
    fn shift(self) -> u8 {
        match self {
            Class::Owner => OWNER_SHIFT,
            Class::Other => 0,
        }
    }
}

/// The six permission bits of an inode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions(u8);

impl Permissions {
    /// `rwx` for both classes
    pub const ALL: Permissions = Permissions(0x3f);

    /// Take the permission bits out of a flag byte
    pub fn from_bits(flags: u8) -> Self {
        Permissions(flags & 0x3f)
    }

    /// Raw bits
    pub fn bits(self) -> u8 {
        self.0
    }

    /// The `rwx` bits of one class
    pub fn class(self, class: Class) -> u8 {
        (self.0 >> class.shift()) & CLASS_MASK
    }

    /// Replace the `rwx` bits of one class
    pub fn with_class(self, class: Class, bits: u8) -> Self {
        let shift = class.shift();
        let cleared = self.0 & !(CLASS_MASK << shift);
        Permissions(cleared | ((bits & CLASS_MASK) << shift))
    }

    /// Whether `class` holds every bit of `wanted`
    pub fn allows(self, class: Class, wanted: u8) -> bool {
        self.class(class) & wanted == wanted
    }
}

fn class_str(bits: u8) -> String {
    let mut s = String::with_capacity(3);
    s.push(if bits & READ != 0 { 'r' } else { '-' });
    s.push(if bits & WRITE != 0 { 'w' } else { '-' });
    s.push(if bits & EXECUTE != 0 { 'x' } else { '-' });
    s
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            class_str(self.class(Class::Owner)),
            class_str(self.class(Class::Other))
        )
    }
}

/// Parse the `who` argument of chmod (`u`, `o`, `a` in any combination)
pub fn parse_who(who: &str) -> Result<Vec<Class>> {
    if who.is_empty() {
        return Err(FsError::InvalidArgument("chmod: missing class".to_string()));
    }
    let mut classes = Vec::new();
    for c in who.chars() {
        let add: &[Class] = match c {
            'u' => &[Class::Owner],
            'o' => &[Class::Other],
            'a' => &[Class::Owner, Class::Other],
            other => {
                return Err(FsError::InvalidArgument(format!(
                    "chmod: unknown class '{}'",
                    other
                )))
            }
        };
        for class in add {
            if !classes.contains(class) {
                classes.push(*class);
            }
        }
    }
    Ok(classes)
}

/// Parse the `how` argument of chmod (`r`, `w`, `x` in any combination, or
/// `-` for no permissions)
pub fn parse_how(how: &str) -> Result<u8> {
    if how.is_empty() {
        return Err(FsError::InvalidArgument("chmod: missing mode".to_string()));
    }
    let mut bits = 0;
    for c in how.chars() {
        bits |= match c {
            'r' => READ,
            'w' => WRITE,
            'x' => EXECUTE,
            '-' => 0,
            other => {
                return Err(FsError::InvalidArgument(format!(
                    "chmod: unknown permission '{}'",
                    other
                )))
            }
        };
    }
    Ok(bits)
}

/// Compute new permissions: every addressed class is set to exactly `how`,
/// the other class keeps its bits
pub fn apply_chmod(current: Permissions, who: &str, how: &str) -> Result<Permissions> {
    let classes = parse_who(who)?;
    let bits = parse_how(how)?;
    Ok(classes
        .into_iter()
        .fold(current, |perms, class| perms.with_class(class, bits)))
}

/// Access requested when opening a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenMode {
    /// Reads allowed through the handle
    pub read: bool,
    /// Writes allowed through the handle
    pub write: bool,
}

impl OpenMode {
    /// Parse `r`, `w` or `rw`
    pub fn parse(mode: &str) -> Result<Self> {
        let mut parsed = OpenMode::default();
        for c in mode.chars() {
            match c {
                'r' => parsed.read = true,
                'w' => parsed.write = true,
                other => {
                    return Err(FsError::InvalidArgument(format!(
                        "open: unknown mode '{}'",
                        other
                    )))
                }
            }
        }
        if !parsed.read && !parsed.write {
            return Err(FsError::InvalidArgument("open: empty mode".to_string()));
        }
        Ok(parsed)
    }

    /// Permission bits this mode needs
    pub fn required_bits(self) -> u8 {
        (if self.read { READ } else { 0 }) | (if self.write { WRITE } else { 0 })
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.read {
            write!(f, "r")?;
        }
        if self.write {
            write!(f, "w")?;
        }
        Ok(())
    }
}

/// Whether `requester` gets the owner class on an inode owned by `owner`.
/// A `requester` of 0 means no session. Entries created without a session
/// (owner 0, including the root directory) are administered by uid 1.
pub fn owner_class_applies(users: &UserTable, owner: u8, requester: u8) -> bool {
    if owner == 0 {
        return requester == 0 || requester == 1;
    }
    requester == owner || users.is_trusted(owner, requester)
}

/// Check `wanted` permission bits for `requester`
pub fn check_access(
    users: &UserTable,
    perms: Permissions,
    owner: u8,
    requester: u8,
    wanted: u8,
) -> bool {
    let class = if owner_class_applies(users, owner, requester) {
        Class::Owner
    } else {
        Class::Other
    };
    perms.allows(class, wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chmod_replaces_addressed_class_only() {
        let perms = Permissions::ALL;

        let p = apply_chmod(perms, "o", "r").unwrap();
        assert_eq!(p.to_string(), "rwxr--");

        let p = apply_chmod(p, "u", "rw").unwrap();
        assert_eq!(p.to_string(), "rw-r--");

        let p = apply_chmod(p, "a", "-").unwrap();
        assert_eq!(p.bits(), 0);

        let p = apply_chmod(p, "uo", "x").unwrap();
        assert_eq!(p.to_string(), "--x--x");
    }

    #[test]
    fn test_chmod_rejects_unknown_letters() {
        assert!(matches!(
            apply_chmod(Permissions::ALL, "g", "r"),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            apply_chmod(Permissions::ALL, "u", "s"),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(apply_chmod(Permissions::ALL, "", "r").is_err());
    }

    #[test]
    fn test_open_mode_parsing() {
        let mode = OpenMode::parse("rw").unwrap();
        assert!(mode.read && mode.write);
        assert_eq!(mode.required_bits(), READ | WRITE);
        assert_eq!(OpenMode::parse("w").unwrap().to_string(), "w");
        assert!(OpenMode::parse("x").is_err());
        assert!(OpenMode::parse("").is_err());
    }

    #[test]
    fn test_owner_class_via_trust() {
        let mut users = UserTable::default();
        let alice = users.add_user("alice", "pw").unwrap();
        let bob = users.add_user("bob", "pw").unwrap();
        let perms = Permissions::ALL.with_class(Class::Other, 0);

        assert!(check_access(&users, perms, alice, alice, READ));
        assert!(!check_access(&users, perms, alice, bob, READ));

        users.grant_trust(alice, bob).unwrap();
        assert!(check_access(&users, perms, alice, bob, READ | WRITE));
        // Trust is directional
        assert!(!owner_class_applies(&users, bob, alice));
    }

    #[test]
    fn test_no_session_is_other_unless_unowned() {
        let users = UserTable::default();
        let perms = Permissions::ALL.with_class(Class::Other, READ);
        assert!(!check_access(&users, perms, 1, 0, WRITE));
        assert!(check_access(&users, perms, 0, 0, WRITE));
    }

    #[test]
    fn test_unowned_entries_belong_to_uid_one() {
        let users = UserTable::default();
        assert!(owner_class_applies(&users, 0, 0));
        assert!(owner_class_applies(&users, 0, 1));
        assert!(!owner_class_applies(&users, 0, 2));
        // A session never gets the owner class of uid 1's entries for free
        assert!(!owner_class_applies(&users, 1, 0));
    }
}
