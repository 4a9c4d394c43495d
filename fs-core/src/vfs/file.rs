//! Chained file index and the byte-level I/O engine
//!
//! A file's inode points at the head of a chain of index tables. Byte `off`
//! lives in link `(off / S) / capacity`, slot `(off / S) % capacity`, at
//! `off % S` within the data block. Slots and links are allocated on first
//! write; a slot that was never written reads as zeros.

use crate::blockdev::BackingStore;
use crate::error::{FsError, Result};
use crate::format::{FileIndexTable, Inode};

use super::FileSystem;

/// Position on an index chain, so consecutive blocks of one transfer do not
/// re-walk the chain from its head
struct ChainCursor {
    hop: u64,
    bno: u32,
    table: FileIndexTable,
}

impl<S: BackingStore> FileSystem<S> {
    /// Move `cursor` to link `hop`, allocating missing links when `grow` is
    /// set. Returns `false` when the chain ends first.
    fn seek_chain(
        &mut self,
        head: u32,
        cursor: &mut Option<ChainCursor>,
        hop: u64,
        grow: bool,
    ) -> Result<bool> {
        let mut current = match cursor.take() {
            Some(c) if c.hop <= hop => c,
            _ => ChainCursor {
                hop: 0,
                bno: head,
                table: self.disk.read_index(head)?,
            },
        };

        while current.hop < hop {
            if current.table.next == 0 {
                if !grow {
                    *cursor = Some(current);
                    return Ok(false);
                }
                let link = self.disk.allocate()?;
                current.table.next = link;
                self.disk.write_index(current.bno, &current.table)?;
                self.disk.update()?;
                log::debug!(
                    "CHAIN: linked index table {} after {} (hop {})",
                    link,
                    current.bno,
                    current.hop + 1
                );
            }
            let next = current.table.next;
            current = ChainCursor {
                hop: current.hop + 1,
                bno: next,
                table: self.disk.read_index(next)?,
            };
        }
        *cursor = Some(current);
        Ok(true)
    }

    /// Copy file bytes starting at `offset` into `buf`, stopping at the end
    /// of the file. Returns the number of bytes read.
    pub(crate) fn read_at(&mut self, inode: &Inode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let layout = self.disk.layout()?;
        let end = (inode.size as u64).min(offset + buf.len() as u64);
        if offset >= end {
            return Ok(0);
        }
        let total = (end - offset) as usize;

        let mut cursor = None;
        let mut done = 0;
        while done < total {
            let pos = layout.locate(offset + done as u64);
            let chunk = (layout.block_size as usize - pos.in_block).min(total - done);
            let out = &mut buf[done..done + chunk];

            let data = if self.seek_chain(inode.content, &mut cursor, pos.hop, false)? {
                cursor.as_ref().map_or(0, |c| c.table.slots[pos.slot])
            } else {
                0
            };
            if data == 0 {
                out.fill(0);
            } else {
                self.disk.read(data, pos.in_block, out)?;
            }
            done += chunk;
        }
        Ok(total)
    }

    /// Write `data` into the file at `offset`, allocating index links and
    /// data blocks as needed and growing `inode.size`
    pub(crate) fn write_at(&mut self, inode: &mut Inode, offset: u64, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let layout = self.disk.layout()?;
        if offset + data.len() as u64 > u32::MAX as u64 {
            return Err(FsError::InvalidArgument(format!(
                "write of {} bytes at {} exceeds the maximum file size",
                data.len(),
                offset
            )));
        }

        let mut cursor = None;
        let mut done = 0;
        while done < data.len() {
            let pos = layout.locate(offset + done as u64);
            let chunk = (layout.block_size as usize - pos.in_block).min(data.len() - done);

            self.seek_chain(inode.content, &mut cursor, pos.hop, true)?;
            let link = cursor
                .as_mut()
                .ok_or_else(|| FsError::Corrupt("index chain cursor lost".to_string()))?;
            let mut block = link.table.slots[pos.slot];
            if block == 0 {
                block = self.disk.allocate()?;
                link.table.slots[pos.slot] = block;
                self.disk.write_index(link.bno, &link.table)?;
                self.disk.update()?;
            }

            self.disk.write(block, pos.in_block, &data[done..done + chunk])?;
            done += chunk;
        }

        let end = (offset + data.len() as u64) as u32;
        if end > inode.size {
            inode.size = end;
        }
        Ok(done)
    }

    /// Free every data block and index table of the chain starting at `head`
    pub(crate) fn release_chain(&mut self, head: u32) -> Result<()> {
        let mut bno = head;
        let mut freed = 0usize;
        while bno != 0 {
            let table = self.disk.read_index(bno)?;
            for data in table.data_blocks() {
                self.disk.free(data)?;
                freed += 1;
            }
            self.disk.free(bno)?;
            freed += 1;
            bno = table.next;
        }
        log::debug!("CHAIN: released {} blocks from chain at {}", freed, head);
        Ok(())
    }

    /// Copy the content of `src` into the empty file `dst`
    pub(crate) fn copy_content(&mut self, src: &Inode, dst: &mut Inode) -> Result<()> {
        let step = self.disk.layout()?.block_size as usize;
        let mut buf = vec![0u8; step];
        let mut offset = 0u64;
        while offset < src.size as u64 {
            let n = self.read_at(src, offset, &mut buf)?;
            if n == 0 {
                break;
            }
            self.write_at(dst, offset, &buf[..n])?;
            offset += n as u64;
        }
        Ok(())
    }
}
