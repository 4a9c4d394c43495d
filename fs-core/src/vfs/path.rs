//! Path resolution
//!
//! Paths are walked on a private copy of the working directory stack, so
//! resolving never moves the caller, whether it succeeds or fails.

use crate::blockdev::BackingStore;
use crate::error::{FsError, Result};
use crate::format::DirEntry;

use super::FileSystem;

/// One directory on the working directory stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirFrame {
    /// Name under the parent; empty for the root
    pub name: String,
    /// Block holding the directory's inode
    pub inode: u32,
    /// Block holding the directory's entry table
    pub content: u32,
}

/// Where a path points: the containing directory and the entry within it
#[derive(Debug, Clone)]
pub struct Location {
    /// Stack of the containing directory, root first
    pub frames: Vec<DirFrame>,
    /// Index of the entry in the containing directory's table
    pub index: usize,
    /// The entry itself
    pub entry: DirEntry,
}

impl Location {
    /// Entry table block of the containing directory
    pub fn dir(&self) -> u32 {
        self.frames.last().map_or(0, |f| f.content)
    }

    /// Whether the entry is a `.` or `..` link
    pub fn is_link(&self) -> bool {
        self.entry.name == "." || self.entry.name == ".."
    }
}

/// Split a path into components.
///
/// A leading `/` becomes an empty component meaning "the root"; repeated and
/// trailing slashes are dropped. `"/"` is therefore `[""]`.
pub fn split_path(path: &str) -> Vec<String> {
    let mut parts = Vec::new();
    if path.starts_with('/') {
        parts.push(String::new());
    }
    parts.extend(
        path.split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    );
    parts
}

/// Render a directory stack as an absolute path
pub fn frames_to_path(frames: &[DirFrame]) -> String {
    if frames.len() <= 1 {
        return "/".to_string();
    }
    frames
        .iter()
        .skip(1)
        .fold(String::new(), |mut s, f| {
            s.push('/');
            s.push_str(&f.name);
            s
        })
}

impl<S: BackingStore> FileSystem<S> {
    /// Move one step from `frames`, treating `component` as a directory
    fn descend(&mut self, frames: &mut Vec<DirFrame>, component: &str) -> Result<()> {
        match component {
            "" => frames.truncate(1),
            "." => {}
            ".." => {
                if frames.len() > 1 {
                    frames.pop();
                }
            }
            name => {
                let top = frames.last().ok_or(FsError::NotMounted)?.content;
                let table = self.disk.read_dir(top)?;
                let entry = table
                    .find(name)
                    .and_then(|i| table.get(i))
                    .ok_or_else(|| FsError::NoSuchDirectory(name.to_string()))?;
                let inode = self.disk.read_inode(entry.inode)?;
                if !inode.is_dir() {
                    return Err(FsError::NoSuchDirectory(name.to_string()));
                }
                frames.push(DirFrame {
                    name: name.to_string(),
                    inode: entry.inode,
                    content: inode.content,
                });
            }
        }
        Ok(())
    }

    /// Walk every component as a directory, starting from the working directory
    pub(crate) fn walk(&mut self, components: &[String]) -> Result<Vec<DirFrame>> {
        let mut frames = self.cwd.clone();
        if frames.is_empty() {
            return Err(FsError::NotMounted);
        }
        for component in components {
            self.descend(&mut frames, component)?;
        }
        Ok(frames)
    }

    /// Resolve `path` to its containing directory and entry index
    pub fn resolve(&mut self, path: &str) -> Result<Location> {
        let mut components = split_path(path);
        let last = components
            .pop()
            .ok_or_else(|| FsError::InvalidArgument("empty path".to_string()))?;
        if last.is_empty() {
            // Only "/" ends in an empty component: the root itself
            return self.resolve_root();
        }
        let frames = self.walk(&components)?;

        let top = frames.last().ok_or(FsError::NotMounted)?;
        let table = self.disk.read_dir(top.content)?;
        let index = table.find(&last).ok_or(FsError::NotFound(last))?;
        let entry = table
            .get(index)
            .cloned()
            .ok_or_else(|| FsError::Corrupt(format!("entry {} vanished", index)))?;
        Ok(Location {
            frames,
            index,
            entry,
        })
    }

    fn resolve_root(&mut self) -> Result<Location> {
        let frames = self.root_frames()?;
        let table = self.disk.read_dir(frames[0].content)?;
        let entry = table
            .get(0)
            .cloned()
            .ok_or_else(|| FsError::Corrupt("root has no self link".to_string()))?;
        Ok(Location {
            frames,
            index: 0,
            entry,
        })
    }

    /// Resolve everything but the last component, which is returned as the
    /// name to create
    pub(crate) fn resolve_parent(&mut self, path: &str) -> Result<(Vec<DirFrame>, String)> {
        let mut components = split_path(path);
        let name = match components.pop() {
            Some(name) if !name.is_empty() => name,
            _ => return Err(FsError::InvalidArgument(format!("'{}' names no entry", path))),
        };
        let frames = self.walk(&components)?;
        Ok((frames, name))
    }

    /// Resolve `path` to a directory and return the stack inside it
    pub(crate) fn resolve_directory(&mut self, path: &str) -> Result<Vec<DirFrame>> {
        let location = self.resolve(path)?;
        let inode = self.disk.read_inode(location.entry.inode)?;
        if !inode.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        self.walk(&split_path(path))
    }

    /// Run `f` as if `frames` were the working directory, restoring the real
    /// one afterwards on every path
    pub(crate) fn with_directory<T>(
        &mut self,
        frames: Vec<DirFrame>,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let saved = std::mem::replace(&mut self.cwd, frames);
        let result = f(self);
        self.cwd = saved;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::tests::mounted;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("/"), vec![""]);
        assert_eq!(split_path("/a//b/"), vec!["", "a", "b"]);
        assert_eq!(split_path("a/./b"), vec!["a", ".", "b"]);
        assert!(split_path("").is_empty());
    }

    #[test]
    fn test_resolve_reports_failing_segment() {
        let mut fs = mounted();
        fs.mkdir("a").unwrap();
        fs.touch("a/f").unwrap();

        assert!(matches!(
            fs.resolve("missing/f"),
            Err(FsError::NoSuchDirectory(s)) if s == "missing"
        ));
        assert!(matches!(
            fs.resolve("a/f/g"),
            Err(FsError::NoSuchDirectory(s)) if s == "f"
        ));
        assert!(matches!(
            fs.resolve("a/nope"),
            Err(FsError::NotFound(s)) if s == "nope"
        ));

        let loc = fs.resolve("/a/../a/f").unwrap();
        assert_eq!(loc.entry.name, "f");
        assert_eq!(loc.index, 2);
    }

    #[test]
    fn test_resolve_never_moves_cwd() {
        let mut fs = mounted();
        fs.mkdir("a").unwrap();
        fs.mkdir("a/b").unwrap();
        fs.cd("a").unwrap();
        let before = fs.pwd();

        fs.resolve("b").unwrap();
        fs.resolve("/").unwrap();
        assert!(fs.resolve("../zz/q").is_err());
        assert!(fs.resolve("b/missing").is_err());
        assert_eq!(fs.pwd(), before);
        assert_eq!(fs.pwd(), "/a");
    }

    #[test]
    fn test_root_forms() {
        let mut fs = mounted();
        let root = fs.resolve("/").unwrap();
        assert_eq!(root.index, 0);
        assert_eq!(root.entry.name, ".");

        let dotdot = fs.resolve("..").unwrap();
        assert_eq!(dotdot.entry.inode, root.entry.inode);
    }

    #[test]
    fn test_with_directory_restores_on_error() {
        let mut fs = mounted();
        fs.mkdir("a").unwrap();
        let inside = fs.resolve_directory("a").unwrap();

        let result: Result<()> = fs.with_directory(inside, |fs| {
            assert_eq!(fs.pwd(), "/a");
            Err(FsError::Busy("x".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(fs.pwd(), "/");
    }
}
