//! Free block allocator for ChainFS
//!
//! Free blocks are kept on a grouped stack: the superblock carries one segment
//! of up to [`SEGMENT_LEN`] free block numbers, and when that segment fills up
//! it is written into the block being freed, which becomes the head of an
//! on-disk overflow chain. Allocation pages the chain back in the same way.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::error::{FsError, Resource, Result};

/// Free block numbers held per segment
pub const SEGMENT_LEN: usize = 64;

/// Encoded size of one segment
pub const SEGMENT_SIZE: usize = 8 + SEGMENT_LEN * 4;

/// One segment of the free stack, as stored in the superblock or in an
/// overflow block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeSegment {
    /// Free block numbers, top of stack last
    pub entries: Vec<u32>,
    /// Block holding the next segment; 0 ends the chain
    pub next: u32,
}

impl FreeSegment {
    /// Write the segment (exactly [`SEGMENT_SIZE`] bytes)
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        writer.write_u32::<LittleEndian>(self.next)?;
        for slot in 0..SEGMENT_LEN {
            writer.write_u32::<LittleEndian>(self.entries.get(slot).copied().unwrap_or(0))?;
        }
        Ok(())
    }

    /// Read a segment
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let count = reader.read_u32::<LittleEndian>()? as usize;
        let next = reader.read_u32::<LittleEndian>()?;
        if count > SEGMENT_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("free segment claims {} entries", count),
            ));
        }
        let mut entries = Vec::with_capacity(SEGMENT_LEN);
        for slot in 0..SEGMENT_LEN {
            let bno = reader.read_u32::<LittleEndian>()?;
            if slot < count {
                entries.push(bno);
            }
        }
        Ok(Self { entries, next })
    }
}

/// Where overflow segments live. The engine implements this on top of the
/// block cache; tests use a map.
pub trait SegmentStore {
    /// Load the segment stored in block `bno`
    fn load_segment(&mut self, bno: u32) -> Result<FreeSegment>;

    /// Store `segment` in block `bno`
    fn store_segment(&mut self, bno: u32, segment: &FreeSegment) -> Result<()>;
}

/// Grouped free block stack
#[derive(Debug, Clone, Default)]
pub struct FreeBlockStack {
    segment: FreeSegment,
    free_count: u32,
    block_count: u32,
}

impl FreeBlockStack {
    /// An empty stack for a disk of `block_count` blocks
    pub fn new(block_count: u32) -> Self {
        Self {
            segment: FreeSegment::default(),
            free_count: 0,
            block_count,
        }
    }

    /// Number of free blocks, including those in the overflow chain
    pub fn free_blocks(&self) -> u32 {
        self.free_count
    }

    /// Number of blocks the stack manages
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub(crate) fn set_block_count(&mut self, block_count: u32) {
        self.block_count = block_count;
    }

    /// Push every block from `block_count - 1` down to 1, so a fresh disk
    /// hands out low block numbers first
    pub fn seed<S: SegmentStore>(&mut self, io: &mut S) -> Result<()> {
        self.segment = FreeSegment::default();
        self.free_count = 0;
        for bno in (1..self.block_count).rev() {
            self.free(io, bno)?;
        }
        log::info!(
            "FREE_STACK: seeded {} free blocks out of {}",
            self.free_count,
            self.block_count
        );
        Ok(())
    }

    /// Take a free block off the stack
    pub fn allocate<S: SegmentStore>(&mut self, io: &mut S) -> Result<u32> {
        if let Some(bno) = self.segment.entries.pop() {
            self.free_count = self.free_count.saturating_sub(1);
            log::debug!("FREE_STACK: allocated block {}", bno);
            return Ok(bno);
        }

        let bno = self.segment.next;
        if bno == 0 {
            log::warn!("FREE_STACK: no free blocks left");
            return Err(FsError::Full(Resource::Disk));
        }

        // The block holding the next segment is itself free once paged in
        let segment = io.load_segment(bno)?;
        log::debug!(
            "FREE_STACK: paged in {} entries from block {}",
            segment.entries.len(),
            bno
        );
        self.segment = segment;
        self.free_count = self.free_count.saturating_sub(1);
        Ok(bno)
    }

    /// Return a block to the stack
    pub fn free<S: SegmentStore>(&mut self, io: &mut S, bno: u32) -> Result<()> {
        if bno == 0 || bno >= self.block_count {
            return Err(FsError::Corrupt(format!(
                "block {} is outside 1..{}",
                bno, self.block_count
            )));
        }
        if self.segment.next == bno || self.segment.entries.contains(&bno) {
            log::warn!("FREE_STACK: block {} freed twice", bno);
            return Err(FsError::Corrupt(format!("block {} is already free", bno)));
        }

        if self.segment.entries.len() >= SEGMENT_LEN {
            io.store_segment(bno, &self.segment)?;
            log::debug!("FREE_STACK: spilled segment into block {}", bno);
            self.segment = FreeSegment {
                entries: Vec::with_capacity(SEGMENT_LEN),
                next: bno,
            };
        } else {
            self.segment.entries.push(bno);
        }
        self.free_count += 1;
        Ok(())
    }

    /// Write the in-memory state
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.free_count)?;
        self.segment.write_to(writer)
    }

    /// Read the in-memory state. The block count comes from the superblock.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let free_count = reader.read_u32::<LittleEndian>()?;
        let segment = FreeSegment::read_from(reader)?;
        Ok(Self {
            segment,
            free_count,
            block_count: 0,
        })
    }

    /// Encode a segment into a block-sized buffer
    pub fn encode_segment(segment: &FreeSegment, block_size: usize) -> io::Result<Vec<u8>> {
        let mut block = vec![0u8; block_size];
        segment.write_to(&mut Cursor::new(&mut block[..]))?;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct MapStore {
        blocks: HashMap<u32, FreeSegment>,
    }

    impl SegmentStore for MapStore {
        fn load_segment(&mut self, bno: u32) -> Result<FreeSegment> {
            self.blocks
                .get(&bno)
                .cloned()
                .ok_or_else(|| FsError::Corrupt(format!("no segment in block {}", bno)))
        }

        fn store_segment(&mut self, bno: u32, segment: &FreeSegment) -> Result<()> {
            self.blocks.insert(bno, segment.clone());
            Ok(())
        }
    }

    #[test]
    fn test_fresh_stack_hands_out_low_blocks() {
        let mut io = MapStore::default();
        let mut stack = FreeBlockStack::new(1000);
        stack.seed(&mut io).unwrap();
        assert_eq!(stack.free_blocks(), 999);

        assert_eq!(stack.allocate(&mut io).unwrap(), 1);
        assert_eq!(stack.allocate(&mut io).unwrap(), 2);
        assert_eq!(stack.free_blocks(), 997);
    }

    #[test]
    fn test_exhaustion_and_block_zero() {
        let mut io = MapStore::default();
        let mut stack = FreeBlockStack::new(200);
        stack.seed(&mut io).unwrap();

        let mut seen = HashSet::new();
        for _ in 0..199 {
            let bno = stack.allocate(&mut io).unwrap();
            assert_ne!(bno, 0);
            assert!(seen.insert(bno), "block {} handed out twice", bno);
        }
        assert!(matches!(
            stack.allocate(&mut io),
            Err(FsError::Full(Resource::Disk))
        ));
        assert_eq!(stack.free_blocks(), 0);
    }

    #[test]
    fn test_rejects_bad_frees() {
        let mut io = MapStore::default();
        let mut stack = FreeBlockStack::new(16);
        stack.seed(&mut io).unwrap();

        assert!(stack.free(&mut io, 0).is_err());
        assert!(stack.free(&mut io, 16).is_err());

        let bno = stack.allocate(&mut io).unwrap();
        stack.free(&mut io, bno).unwrap();
        assert!(matches!(stack.free(&mut io, bno), Err(FsError::Corrupt(_))));
    }

    #[test]
    fn test_random_allocate_free_never_duplicates() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut io = MapStore::default();
        let mut stack = FreeBlockStack::new(700);
        stack.seed(&mut io).unwrap();

        let mut live: Vec<u32> = Vec::new();
        let mut live_set = HashSet::new();
        for _ in 0..5000 {
            if live.is_empty() || rng.gen_bool(0.6) {
                match stack.allocate(&mut io) {
                    Ok(bno) => {
                        assert!(live_set.insert(bno), "block {} is already in use", bno);
                        live.push(bno);
                    }
                    Err(FsError::Full(_)) => assert_eq!(live.len(), 699),
                    Err(e) => panic!("unexpected error: {}", e),
                }
            } else {
                let bno = live.swap_remove(rng.gen_range(0..live.len()));
                live_set.remove(&bno);
                stack.free(&mut io, bno).unwrap();
            }
            assert_eq!(stack.free_blocks() as usize + live.len(), 699);
        }

        // Everything freed must come back exactly once
        for bno in live.drain(..) {
            stack.free(&mut io, bno).unwrap();
        }
        let mut again = HashSet::new();
        while let Ok(bno) = stack.allocate(&mut io) {
            assert!(again.insert(bno));
        }
        assert_eq!(again.len(), 699);
    }

    #[test]
    fn test_state_survives_encoding() {
        let mut io = MapStore::default();
        let mut stack = FreeBlockStack::new(300);
        stack.seed(&mut io).unwrap();
        stack.allocate(&mut io).unwrap();

        let mut buf = Vec::new();
        stack.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 4 + SEGMENT_SIZE);

        let mut loaded = FreeBlockStack::read_from(&mut Cursor::new(&buf)).unwrap();
        loaded.set_block_count(300);
        assert_eq!(loaded.free_blocks(), 298);
        assert_eq!(loaded.allocate(&mut io).unwrap(), 2);
    }
}
