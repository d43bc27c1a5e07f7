//! Decoder for Git delta instructions that rebuilds target objects from a
//! base buffer and the instruction stream produced by [`super::encode`].

use std::io::{ErrorKind, Read};

use crate::errors::GitError;
use crate::utils::{read_byte, read_partial_int, read_size_encoding};

const COPY_INSTRUCTION_FLAG: u8 = 1 << 7; // msb set => copy from base, otherwise inline data
const COPY_OFFSET_BYTES: u8 = 4;
const COPY_SIZE_BYTES: u8 = 3;
const COPY_ZERO_SIZE: usize = 0x10000;

/// Apply a delta stream to `base_info`, returning the reconstructed target
/// bytes. The stream format matches Git's delta encoding:
/// - leading base size, then result size (varint)
/// - sequence of ops: data instructions (msb=0, lower 7 bits = literal
///   length) or copy instructions (msb=1, following bytes encode offset and
///   size).
pub fn delta_decode(stream: &mut impl Read, base_info: &[u8]) -> Result<Vec<u8>, GitError> {
    let base_size = read_size_encoding(stream)?;
    if base_info.len() != base_size {
        return Err(GitError::CorruptPack(format!(
            "delta base size {} does not match actual base length {}",
            base_size,
            base_info.len()
        )));
    }

    let result_size = read_size_encoding(stream)?;
    let mut buffer = Vec::with_capacity(result_size);
    loop {
        // An exhausted stream means the target object is complete.
        let instruction = match read_byte(stream) {
            Ok(instruction) => instruction,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => {
                return Err(GitError::CorruptPack(format!(
                    "wrong instruction in delta: {err}"
                )));
            }
        };

        if instruction & COPY_INSTRUCTION_FLAG == 0 {
            // Data instruction; the instruction byte is the literal length.
            if instruction == 0 {
                // Appending 0 bytes doesn't make sense, so git disallows it.
                return Err(GitError::CorruptPack(
                    "invalid data instruction of length 0".to_string(),
                ));
            }

            let mut data = vec![0; instruction as usize];
            stream.read_exact(&mut data).map_err(|e| {
                GitError::CorruptPack(format!("delta literal truncated: {e}"))
            })?;
            buffer.extend_from_slice(&data);
        } else {
            // Copy instruction.
            let mut nonzero_bytes = instruction;
            let offset = read_partial_int(stream, COPY_OFFSET_BYTES, &mut nonzero_bytes)?;
            let mut size = read_partial_int(stream, COPY_SIZE_BYTES, &mut nonzero_bytes)?;
            if size == 0 {
                // Copying 0 bytes doesn't make sense, so git assumes a different size.
                size = COPY_ZERO_SIZE;
            }
            let base_data = base_info.get(offset..(offset + size)).ok_or_else(|| {
                GitError::CorruptPack("invalid copy instruction".to_string())
            })?;
            buffer.extend_from_slice(base_data);
        }
    }

    if buffer.len() != result_size {
        return Err(GitError::CorruptPack(format!(
            "delta produced {} bytes, declared result size is {result_size}",
            buffer.len()
        )));
    }
    Ok(buffer)
}
