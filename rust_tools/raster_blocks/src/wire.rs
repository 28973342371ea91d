//! Frame protocol between the engine and subprocess compute workers.
//!
//! Every frame is a one byte tag, a little-endian `u64` payload length and
//! the payload. Scalars inside the payload are little-endian too; pixel data
//! is copied as raw bytes, so both ends must share a byte order.

use crate::array::{with_block_array, with_pixel_type, Pixel, PixelType};
use crate::associations::{BlockAssociations, SlotKey};
use crate::chunking::BlockDefn;
use crate::error::{BlockError, Result};
use crate::pixelgrid::PixelGridDefn;
use crate::transform::RunInfo;
use ndarray::Array3;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read, Write};

const TAG_SETUP: u8 = 1;
const TAG_BLOCK: u8 = 2;
const TAG_OUTPUTS: u8 = 3;
const TAG_FAILURE: u8 = 4;
const TAG_SHUTDOWN: u8 = 5;

/// Frames larger than this are rejected as corrupt.
const MAX_FRAME_LEN: u64 = 1 << 32;

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Engine to worker, once before any block.
    Setup(RunInfo),
    /// Engine to worker: the input arrays of one block.
    Block {
        index: usize,
        block: BlockDefn,
        inputs: BlockAssociations,
    },
    /// Worker to engine: the output arrays of one block.
    Outputs {
        index: usize,
        outputs: BlockAssociations,
    },
    /// Worker to engine: the transform failed on the last block sent.
    Failure(String),
    /// Engine to worker: no more blocks.
    Shutdown,
}

struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn usize(&mut self, v: usize) {
        self.u64(v as u64);
    }

    fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn str(&mut self, s: &str) {
        self.usize(s.len());
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn key(&mut self, key: &SlotKey) {
        self.str(&key.name);
        match key.seq {
            Some(seq) => {
                self.u8(1);
                self.usize(seq);
            }
            None => self.u8(0),
        }
    }

    fn block(&mut self, block: &BlockDefn) {
        self.usize(block.top);
        self.usize(block.left);
        self.usize(block.nrows);
        self.usize(block.ncols);
    }

    fn typed<T: Pixel>(&mut self, array: &Array3<T>) {
        let contiguous = array.as_standard_layout();
        match contiguous.as_slice() {
            Some(values) => self.buf.extend_from_slice(bytemuck::cast_slice(values)),
            None => {
                for value in contiguous.iter() {
                    self.buf.extend_from_slice(bytemuck::bytes_of(value));
                }
            }
        }
    }

    fn arrays(&mut self, arrays: &BlockAssociations) {
        self.usize(arrays.len());
        for (key, array) in arrays.iter() {
            self.key(key);
            self.u8(array.pixel_type().code());
            let (bands, rows, cols) = array.shape();
            self.usize(bands);
            self.usize(rows);
            self.usize(cols);
            with_block_array!(array, a => self.typed(a));
        }
    }
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(BlockError::Protocol(format!(
                "frame truncated: wanted {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.buf.len() - self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    fn usize(&mut self) -> Result<usize> {
        let v = self.u64()?;
        usize::try_from(v).map_err(|_| BlockError::Protocol(format!("value {} overflows usize", v)))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.u64()?))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.usize()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| BlockError::Protocol(format!("invalid UTF-8: {}", e)))
    }

    fn key(&mut self) -> Result<SlotKey> {
        let name = self.string()?;
        Ok(match self.u8()? {
            0 => SlotKey::single(name),
            _ => SlotKey::listed(name, self.usize()?),
        })
    }

    fn block(&mut self) -> Result<BlockDefn> {
        Ok(BlockDefn {
            top: self.usize()?,
            left: self.usize()?,
            nrows: self.usize()?,
            ncols: self.usize()?,
        })
    }

    fn typed<T: Pixel>(&mut self, shape: (usize, usize, usize)) -> Result<Array3<T>> {
        let too_large = || BlockError::Protocol(format!("array shape {:?} too large", shape));
        let count = shape
            .0
            .checked_mul(shape.1)
            .and_then(|n| n.checked_mul(shape.2))
            .ok_or_else(too_large)?;
        let len = count.checked_mul(std::mem::size_of::<T>()).ok_or_else(too_large)?;
        let bytes = self.take(len)?;
        let mut values = vec![T::default(); count];
        bytemuck::cast_slice_mut::<T, u8>(&mut values).copy_from_slice(bytes);
        Ok(Array3::from_shape_vec(shape, values)?)
    }

    fn arrays(&mut self) -> Result<BlockAssociations> {
        let count = self.usize()?;
        let mut arrays = BlockAssociations::new();
        for _ in 0..count {
            let key = self.key()?;
            let code = self.u8()?;
            let pixel_type = PixelType::from_code(code)
                .ok_or_else(|| BlockError::Protocol(format!("unknown pixel type code {}", code)))?;
            let shape = (self.usize()?, self.usize()?, self.usize()?);
            let array = with_pixel_type!(pixel_type, T => T::wrap(self.typed::<T>(shape)?));
            arrays.insert(key, array);
        }
        Ok(arrays)
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.buf.len() {
            return Err(BlockError::Protocol(format!(
                "{} trailing bytes in frame",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}

fn encode_run_info(enc: &mut Encoder, run: &RunInfo) {
    let grid = &run.working_grid;
    enc.str(&grid.projection);
    for v in [grid.xmin, grid.xmax, grid.ymin, grid.ymax, grid.xres, grid.yres] {
        enc.f64(v);
    }
    enc.usize(run.margin);
    enc.usize(run.total_blocks);
    enc.usize(run.nodata.len());
    for (key, bands) in &run.nodata {
        enc.key(key);
        enc.usize(bands.len());
        for nodata in bands {
            match nodata {
                Some(v) => {
                    enc.u8(1);
                    enc.f64(*v);
                }
                None => enc.u8(0),
            }
        }
    }
}

fn decode_run_info(dec: &mut Decoder) -> Result<RunInfo> {
    let projection = dec.string()?;
    let (xmin, xmax, ymin, ymax) = (dec.f64()?, dec.f64()?, dec.f64()?, dec.f64()?);
    let (xres, yres) = (dec.f64()?, dec.f64()?);
    let working_grid = PixelGridDefn::new(projection, xmin, xmax, ymin, ymax, xres, yres)?;
    let margin = dec.usize()?;
    let total_blocks = dec.usize()?;

    let mut nodata = BTreeMap::new();
    for _ in 0..dec.usize()? {
        let key = dec.key()?;
        let band_count = dec.usize()?;
        let mut bands = Vec::with_capacity(band_count.min(1024));
        for _ in 0..band_count {
            bands.push(match dec.u8()? {
                0 => None,
                _ => Some(dec.f64()?),
            });
        }
        nodata.insert(key, bands);
    }

    Ok(RunInfo {
        working_grid,
        margin,
        total_blocks,
        nodata,
    })
}

impl Frame {
    fn encode(&self) -> (u8, Vec<u8>) {
        let mut enc = Encoder::new();
        let tag = match self {
            Frame::Setup(run) => {
                encode_run_info(&mut enc, run);
                TAG_SETUP
            }
            Frame::Block { index, block, inputs } => {
                enc.usize(*index);
                enc.block(block);
                enc.arrays(inputs);
                TAG_BLOCK
            }
            Frame::Outputs { index, outputs } => {
                enc.usize(*index);
                enc.arrays(outputs);
                TAG_OUTPUTS
            }
            Frame::Failure(message) => {
                enc.str(message);
                TAG_FAILURE
            }
            Frame::Shutdown => TAG_SHUTDOWN,
        };
        (tag, enc.buf)
    }

    fn decode(tag: u8, payload: &[u8]) -> Result<Frame> {
        let mut dec = Decoder::new(payload);
        let frame = match tag {
            TAG_SETUP => Frame::Setup(decode_run_info(&mut dec)?),
            TAG_BLOCK => Frame::Block {
                index: dec.usize()?,
                block: dec.block()?,
                inputs: dec.arrays()?,
            },
            TAG_OUTPUTS => Frame::Outputs {
                index: dec.usize()?,
                outputs: dec.arrays()?,
            },
            TAG_FAILURE => Frame::Failure(dec.string()?),
            TAG_SHUTDOWN => Frame::Shutdown,
            other => return Err(BlockError::Protocol(format!("unknown frame tag {}", other))),
        };
        dec.finish()?;
        Ok(frame)
    }
}

/// Write one frame and flush.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    let (tag, payload) = frame.encode();
    writer.write_all(&[tag])?;
    writer.write_all(&(payload.len() as u64).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean end of stream before a frame starts.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Frame>> {
    let mut tag = [0u8; 1];
    match reader.read_exact(&mut tag) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let mut len = [0u8; 8];
    reader.read_exact(&mut len)?;
    let len = u64::from_le_bytes(len);
    if len > MAX_FRAME_LEN {
        return Err(BlockError::Protocol(format!("frame length {} too large", len)));
    }

    // Grows with the bytes that actually arrive, not the length claimed
    let mut payload = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut payload)?;
    if payload.len() as u64 != len {
        return Err(BlockError::Protocol(format!(
            "frame ended after {} of {} bytes",
            payload.len(),
            len
        )));
    }
    Frame::decode(tag[0], &payload).map(Some)
}
