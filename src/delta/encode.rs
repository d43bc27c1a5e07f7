//! Myers-based delta encoder that emits Git-compatible instructions and
//! exposes the similarity rate between the two buffers.

use diffs::{Diff, myers};

use crate::utils::write_size_encoding;

const DATA_INS_LEN: usize = 0x7f;

/// Delta operation kind: inline literal data or copy-from-base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Optype {
    Data,
    Copy,
}

/// A single delta op: either copy `len` bytes from `begin` in the base, or
/// insert `len` bytes taken from `new_data` at `begin`.
#[derive(Debug, Clone, Copy)]
struct DeltaOp {
    ins: Optype,
    begin: usize,
    len: usize,
}

/// Holds the diff plan and similarity stats between two byte slices.
#[derive(Debug)]
pub struct DeltaDiff<'a> {
    ops: Vec<DeltaOp>,
    old_data: &'a [u8],
    new_data: &'a [u8],
    ssam: usize,
    ssam_r: f64,
}

impl<'a> DeltaDiff<'a> {
    /// Build a delta plan between two byte slices, collecting copy/insert
    /// operations and similarity stats.
    pub fn new(old_data: &'a [u8], new_data: &'a [u8]) -> Self {
        let mut delta_diff = DeltaDiff {
            ops: vec![],
            old_data,
            new_data,
            ssam: 0,
            ssam_r: 0.00,
        };

        myers::diff(
            &mut delta_diff,
            old_data,
            0,
            old_data.len(),
            new_data,
            0,
            new_data.len(),
        )
        .expect("myers diff over byte slices is infallible");

        delta_diff
    }

    /// Encode as a Git delta stream:
    /// `[varint old_size][varint new_size][ops...]` where each op is either
    /// - data (msb=0, lower 7 bits = literal length, followed by the bytes)
    /// - copy (msb=1, flag bits describe which offset/size bytes follow).
    pub fn encode(&self) -> Vec<u8> {
        let mut result: Vec<u8> = Vec::with_capacity(self.ops.len() * 30);
        result.append(&mut write_size_encoding(self.old_data.len()));
        result.append(&mut write_size_encoding(self.new_data.len()));

        for op in &self.ops {
            result.append(&mut self.encode_op(op));
        }
        result
    }

    /// Encode a single delta op to raw bytes.
    fn encode_op(&self, op: &DeltaOp) -> Vec<u8> {
        let mut op_data = vec![];

        match op.ins {
            Optype::Data => {
                let instruct = (op.len & 0x7f) as u8;
                op_data.push(instruct);
                op_data.extend_from_slice(&self.new_data[op.begin..op.begin + op.len]);
            }

            Optype::Copy => {
                let mut instruct: u8 = 0x80;
                let mut offset = op.begin;
                let mut size = op.len;
                let mut copy_data = vec![];

                for i in 0..4 {
                    let byte = (offset & 0xff) as u8;
                    if byte != 0 {
                        instruct |= 1 << i;
                        copy_data.push(byte)
                    }
                    offset >>= 8;
                }

                for i in 4..7 {
                    let byte = (size & 0xff) as u8;
                    if byte != 0 {
                        instruct |= 1 << i;
                        copy_data.push(byte)
                    }
                    size >>= 8;
                }

                op_data.push(instruct);
                op_data.append(&mut copy_data);
            }
        }

        op_data
    }

    /// Similarity rate (shared-bytes / new-data length), computed in `finish`.
    pub fn get_ssam_rate(&self) -> f64 {
        self.ssam_r
    }
}

impl Diff for DeltaDiff<'_> {
    type Error = ();

    fn equal(&mut self, old: usize, _new: usize, len: usize) -> Result<(), Self::Error> {
        self.ssam += len;
        if let Some(tail) = self.ops.last_mut()
            && tail.begin + tail.len == old
            && tail.ins == Optype::Copy
        {
            tail.len += len;
        } else {
            self.ops.push(DeltaOp {
                ins: Optype::Copy,
                begin: old,
                len,
            });
        }

        Ok(())
    }

    fn insert(&mut self, _old: usize, new: usize, len: usize) -> Result<(), ()> {
        let mut len = len;
        let mut new = new;

        if len > DATA_INS_LEN {
            // Literal runs cap at 0x7f bytes per instruction.
            while len > DATA_INS_LEN {
                self.ops.push(DeltaOp {
                    ins: Optype::Data,
                    begin: new,
                    len: DATA_INS_LEN,
                });

                len -= DATA_INS_LEN;
                new += DATA_INS_LEN;
            }

            self.ops.push(DeltaOp {
                ins: Optype::Data,
                begin: new,
                len,
            });
        } else if let Some(tail) = self.ops.last_mut()
            && tail.begin + tail.len == new
            && tail.ins == Optype::Data
            && tail.len + len < DATA_INS_LEN
        {
            tail.len += len;
        } else {
            self.ops.push(DeltaOp {
                ins: Optype::Data,
                begin: new,
                len,
            });
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<(), Self::Error> {
        // compute the ssam rate when the diff process finishes.
        if !self.new_data.is_empty() {
            self.ssam_r = self.ssam as f64 / self.new_data.len() as f64;
        }
        Ok(())
    }
}
