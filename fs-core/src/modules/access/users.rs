//! User credentials and trust groups
//!
//! Passwords are stored as `SHA-256(salt || password)` with a random 16-byte
//! salt per user. uid 0 is never assigned; it stands for "no session".

use byteorder::{ReadBytesExt, WriteBytesExt};
use ring::digest;
use std::io::{self, Read, Write};

use crate::error::{FsError, Resource, Result};
use crate::format::{read_name, write_name};

/// Number of user slots
pub const MAX_USERS: usize = 8;
/// Width of the user name field
pub const USER_NAME_LEN: usize = 16;
/// Salt length
pub const SALT_LEN: usize = 16;
/// Password hash length
pub const HASH_LEN: usize = 32;

/// One account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// User id, 1..=8
    pub uid: u8,
    /// Login name
    pub name: String,
    salt: [u8; SALT_LEN],
    hash: [u8; HASH_LEN],
    /// Bit `uid - 1` is set for every user this user trusts
    pub trust: u8,
}

fn hash_password(salt: &[u8; SALT_LEN], password: &str) -> [u8; HASH_LEN] {
    let mut ctx = digest::Context::new(&digest::SHA256);
    ctx.update(salt);
    ctx.update(password.as_bytes());
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(ctx.finish().as_ref());
    out
}

impl UserRecord {
    fn new(uid: u8, name: &str, password: &str) -> Result<Self> {
        let mut salt = [0u8; SALT_LEN];
        getrandom::getrandom(&mut salt).map_err(|e| {
            FsError::Io(io::Error::new(io::ErrorKind::Other, e.to_string()))
        })?;
        Ok(Self {
            uid,
            name: name.to_string(),
            hash: hash_password(&salt, password),
            salt,
            trust: 0,
        })
    }

    /// Check a password against the stored hash
    pub fn verify(&self, password: &str) -> bool {
        hash_password(&self.salt, password) == self.hash
    }

    /// Whether this user trusts `uid`
    pub fn trusts(&self, uid: u8) -> bool {
        (1..=MAX_USERS as u8).contains(&uid) && self.trust & (1 << (uid - 1)) != 0
    }
}

/// The bounded user table stored in the superblock
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserTable {
    slots: [Option<UserRecord>; MAX_USERS],
}

impl UserTable {
    /// Registered users in uid order
    pub fn iter(&self) -> impl Iterator<Item = &UserRecord> {
        self.slots.iter().flatten()
    }

    /// Look a user up by uid
    pub fn get(&self, uid: u8) -> Option<&UserRecord> {
        if uid == 0 {
            return None;
        }
        self.slots.get(uid as usize - 1)?.as_ref()
    }

    /// Look a user up by name
    pub fn find(&self, name: &str) -> Option<&UserRecord> {
        self.iter().find(|u| u.name == name)
    }

    /// Register a user and return the new uid
    pub fn add_user(&mut self, name: &str, password: &str) -> Result<u8> {
        if name.is_empty()
            || name.len() >= USER_NAME_LEN
            || name.contains(|c: char| c.is_whitespace() || c == '\0')
        {
            return Err(FsError::InvalidArgument(format!(
                "'{}' is not a valid user name",
                name
            )));
        }
        if self.find(name).is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::Full(Resource::UserTable))?;
        let uid = slot as u8 + 1;
        self.slots[slot] = Some(UserRecord::new(uid, name, password)?);
        log::info!("USERS: added '{}' as uid {}", name, uid);
        Ok(uid)
    }

    /// Authenticate; returns 0 when the name or password is wrong
    pub fn verify_user(&self, name: &str, password: &str) -> u8 {
        match self.find(name) {
            Some(user) if user.verify(password) => user.uid,
            _ => 0,
        }
    }

    /// Whether `subject` trusts `target`
    pub fn is_trusted(&self, subject: u8, target: u8) -> bool {
        self.get(subject).map_or(false, |u| u.trusts(target))
    }

    /// Let `owner` trust `target`
    pub fn grant_trust(&mut self, owner: u8, target: u8) -> Result<()> {
        self.update_trust(owner, target, true)
    }

    /// Withdraw `owner`'s trust in `target`
    pub fn revoke_trust(&mut self, owner: u8, target: u8) -> Result<()> {
        self.update_trust(owner, target, false)
    }

    fn update_trust(&mut self, owner: u8, target: u8, trusted: bool) -> Result<()> {
        if self.get(target).is_none() {
            return Err(FsError::InvalidArgument(format!("no user with uid {}", target)));
        }
        let user = self
            .slots
            .get_mut((owner as usize).wrapping_sub(1))
            .and_then(Option::as_mut)
            .ok_or_else(|| FsError::InvalidArgument(format!("no user with uid {}", owner)))?;
        let bit = 1 << (target - 1);
        if trusted {
            user.trust |= bit;
        } else {
            user.trust &= !bit;
        }
        log::debug!("USERS: uid {} trust bitmap now {:#010b}", owner, user.trust);
        Ok(())
    }

    /// Write every slot; an empty slot has uid 0
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for slot in &self.slots {
            match slot {
                Some(user) => {
                    writer.write_u8(user.uid)?;
                    write_name(writer, &user.name, USER_NAME_LEN)?;
                    writer.write_all(&user.salt)?;
                    writer.write_all(&user.hash)?;
                    writer.write_u8(user.trust)?;
                }
                None => writer.write_all(&[0u8; 2 + USER_NAME_LEN + SALT_LEN + HASH_LEN])?,
            }
        }
        Ok(())
    }

    /// Read the table
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut table = UserTable::default();
        for (i, slot) in table.slots.iter_mut().enumerate() {
            let uid = reader.read_u8()?;
            let mut name = [0u8; USER_NAME_LEN];
            reader.read_exact(&mut name)?;
            let mut salt = [0u8; SALT_LEN];
            reader.read_exact(&mut salt)?;
            let mut hash = [0u8; HASH_LEN];
            reader.read_exact(&mut hash)?;
            let trust = reader.read_u8()?;
            if uid == 0 {
                continue;
            }
            if uid as usize != i + 1 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("user slot {} holds uid {}", i, uid),
                ));
            }
            *slot = Some(UserRecord {
                uid,
                name: read_name(&name)?,
                salt,
                hash,
                trust,
            });
        }
        Ok(table)
    }
}
