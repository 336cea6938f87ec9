use std::io::{Read, Write};

use flate2::{read::GzDecoder, write::GzEncoder};

use super::framing::Compression;
use crate::errors::CompressionError;

/// Gzip-compresses `data` with the default compression level.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
	let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), flate2::Compression::default());
	encoder.write_all(data).map_err(CompressionError::Compress)?;
	encoder.finish().map_err(CompressionError::Compress)
}

/// Inflates a gzip stream. A corrupt or truncated stream is an error, partial
/// output is never returned.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
	let mut decoder = GzDecoder::new(data);
	let mut output = Vec::with_capacity(data.len() * 2);
	decoder.read_to_end(&mut output).map_err(CompressionError::Decompress)?;
	Ok(output)
}

/// Applies the compression named by a frame header to an outgoing payload.
pub fn encode_payload(compression: Compression, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
	match compression {
		Compression::Gzip => compress(data),
		Compression::None => Ok(data.to_vec()),
	}
}

/// Reverses [encode_payload] for an incoming payload.
pub fn decode_payload(compression: Compression, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
	match compression {
		Compression::Gzip => decompress(data),
		Compression::None => Ok(data.to_vec()),
	}
}
