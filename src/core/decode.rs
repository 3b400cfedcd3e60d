//! Stream filter decoding.
//!
//! PDF stream bodies are wrapped in zero or more filters named by /Filter,
//! each optionally parameterized by /DecodeParms. The supported stages are
//! FlateDecode (with PNG predictors), LZWDecode, ASCII85Decode,
//! ASCIIHexDecode and RunLengthDecode. Image codecs (DCTDecode,
//! CCITTFaxDecode, JBIG2Decode, JPXDecode) are left undecoded — their
//! dictionaries stay readable but text extraction never needs their
//! payloads.

use super::error::{PDFError, PDFResult};
use super::parser::{Dict, PDFObject};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;

/// Decodes a FlateDecode (zlib/deflate) compressed stream.
///
/// Tries the zlib container first, then raw deflate — some generators
/// omit the zlib header.
pub fn decode_flate(compressed: &[u8]) -> PDFResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut decompressed = Vec::new();

    match decoder.read_to_end(&mut decompressed) {
        Ok(_) => Ok(decompressed),
        Err(zlib_err) => {
            decompressed.clear();
            let mut raw_decoder = DeflateDecoder::new(compressed);
            match raw_decoder.read_to_end(&mut decompressed) {
                Ok(_) => Ok(decompressed),
                Err(deflate_err) => Err(PDFError::stream(format!(
                    "FlateDecode failed: zlib ({}), raw deflate ({})",
                    zlib_err, deflate_err
                ))),
            }
        }
    }
}

/// Decodes an LZWDecode stream.
///
/// Variable-width MSB-first codes of 9-12 bits. The code width grows one
/// code early unless /EarlyChange 0 was given.
pub fn decode_lzw(data: &[u8], early_change: bool) -> PDFResult<Vec<u8>> {
    let mut decoder = if early_change {
        weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
    } else {
        weezl::decode::Decoder::new(weezl::BitOrder::Msb, 8)
    };

    decoder
        .decode(data)
        .map_err(|e| PDFError::stream(format!("LZWDecode failed: {}", e)))
}

/// Decodes ASCIIHex-encoded data: nibble pairs up to '>', whitespace
/// skipped, an odd trailing nibble implies a following '0'.
pub fn decode_ascii_hex(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len() / 2);
    let mut first_digit: Option<u8> = None;

    for &byte in data {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            b'>' => break,
            b if super::lexer::is_whitespace(b as i32) => continue,
            other => {
                return Err(PDFError::stream(format!(
                    "invalid ASCIIHex character: 0x{:02x}",
                    other
                )));
            }
        };

        match first_digit.take() {
            None => first_digit = Some(digit),
            Some(high) => result.push((high << 4) | digit),
        }
    }

    if let Some(high) = first_digit {
        result.push(high << 4);
    }

    Ok(result)
}

/// Decodes ASCII85-encoded data: 5 characters per 4 bytes, 'z' for a zero
/// group, '~>' terminator, partial trailing groups padded with 'u'.
pub fn decode_ascii85(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len() * 4 / 5);
    let mut tuple: u32 = 0;
    let mut count = 0usize;

    for &byte in data {
        match byte {
            b'~' | b'>' => break,
            b'z' if count == 0 => result.extend_from_slice(&[0u8; 4]),
            b if super::lexer::is_whitespace(b as i32) => continue,
            b'!'..=b'u' => {
                tuple = tuple
                    .wrapping_mul(85)
                    .wrapping_add((byte - b'!') as u32);
                count += 1;
                if count == 5 {
                    result.extend_from_slice(&tuple.to_be_bytes());
                    tuple = 0;
                    count = 0;
                }
            }
            other => {
                return Err(PDFError::stream(format!(
                    "invalid ASCII85 character: 0x{:02x}",
                    other
                )));
            }
        }
    }

    if count > 0 {
        // Pad the partial group with 'u' (84) and keep count-1 bytes
        for _ in count..5 {
            tuple = tuple.wrapping_mul(85).wrapping_add(84);
        }
        let bytes = tuple.to_be_bytes();
        result.extend_from_slice(&bytes[..count - 1]);
    }

    Ok(result)
}

/// Decodes RunLengthDecode data.
///
/// Length byte n: 0-127 copies n+1 literals, 129-255 repeats the next byte
/// 257-n times, 128 ends the data.
pub fn decode_run_length(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len() * 2);
    let mut i = 0;

    while i < data.len() {
        let n = data[i];
        i += 1;
        match n {
            0..=127 => {
                let count = n as usize + 1;
                if i + count > data.len() {
                    return Err(PDFError::stream("RunLengthDecode literal run truncated"));
                }
                result.extend_from_slice(&data[i..i + count]);
                i += count;
            }
            128 => break,
            129..=255 => {
                let count = 257 - n as usize;
                let byte = *data
                    .get(i)
                    .ok_or_else(|| PDFError::stream("RunLengthDecode repeat run truncated"))?;
                i += 1;
                result.extend(std::iter::repeat(byte).take(count));
            }
        }
    }

    Ok(result)
}

/// Reverses PNG row prediction (predictors 10-14 in /Predictor terms).
///
/// Each row carries a leading filter byte selecting None/Sub/Up/Average/
/// Paeth; the previous row is the reference.
pub fn decode_png_predictor(
    data: &[u8],
    colors: usize,
    bits_per_component: usize,
    columns: usize,
) -> PDFResult<Vec<u8>> {
    let pix_bytes = (colors * bits_per_component).div_ceil(8).max(1);
    let row_bytes = (columns * colors * bits_per_component).div_ceil(8);
    let stride = 1 + row_bytes;

    if row_bytes == 0 || data.len() % stride != 0 {
        return Err(PDFError::stream(format!(
            "predictor data length {} does not divide by row stride {}",
            data.len(),
            stride
        )));
    }

    let num_rows = data.len() / stride;
    let mut output = Vec::with_capacity(num_rows * row_bytes);
    let mut prev_row = vec![0u8; row_bytes];

    for row_idx in 0..num_rows {
        let row_start = row_idx * stride;
        let filter = data[row_start];
        let raw = &data[row_start + 1..row_start + stride];
        let out_base = output.len();

        match filter {
            0 => output.extend_from_slice(raw),
            1 => {
                // Sub: left neighbor
                for i in 0..row_bytes {
                    let left = if i >= pix_bytes {
                        output[out_base + i - pix_bytes]
                    } else {
                        0
                    };
                    output.push(left.wrapping_add(raw[i]));
                }
            }
            2 => {
                // Up: previous row
                for i in 0..row_bytes {
                    output.push(prev_row[i].wrapping_add(raw[i]));
                }
            }
            3 => {
                // Average of left and up
                for i in 0..row_bytes {
                    let left = if i >= pix_bytes {
                        output[out_base + i - pix_bytes] as u16
                    } else {
                        0
                    };
                    let up = prev_row[i] as u16;
                    output.push((((left + up) / 2) as u8).wrapping_add(raw[i]));
                }
            }
            4 => {
                // Paeth
                for i in 0..row_bytes {
                    let (left, up_left) = if i >= pix_bytes {
                        (output[out_base + i - pix_bytes], prev_row[i - pix_bytes])
                    } else {
                        (0, 0)
                    };
                    let up = prev_row[i];

                    let p = left as i32 + up as i32 - up_left as i32;
                    let pa = (p - left as i32).abs();
                    let pb = (p - up as i32).abs();
                    let pc = (p - up_left as i32).abs();

                    let paeth = if pa <= pb && pa <= pc {
                        left
                    } else if pb <= pc {
                        up
                    } else {
                        up_left
                    };

                    output.push(paeth.wrapping_add(raw[i]));
                }
            }
            other => {
                return Err(PDFError::stream(format!(
                    "unsupported PNG row filter: {}",
                    other
                )));
            }
        }

        prev_row.copy_from_slice(&output[out_base..out_base + row_bytes]);
    }

    Ok(output)
}

/// Image codecs that stay undecoded on the text path.
fn is_image_filter(name: &str) -> bool {
    matches!(
        name,
        "DCTDecode" | "DCT" | "CCITTFaxDecode" | "CCF" | "JBIG2Decode" | "JPXDecode"
    )
}

fn parms_usize(parms: Option<&Dict>, key: &str, default: usize) -> usize {
    parms
        .and_then(|p| p.get(key))
        .and_then(|obj| obj.as_integer())
        .map(|n| n.max(0) as usize)
        .unwrap_or(default)
}

/// Applies a single filter stage, including any predictor post-processing.
fn apply_one(data: Vec<u8>, name: &str, parms: Option<&Dict>) -> PDFResult<Vec<u8>> {
    let decoded = match name {
        "FlateDecode" | "Fl" => decode_flate(&data)?,
        "LZWDecode" | "LZW" => {
            let early_change = parms_usize(parms, "EarlyChange", 1) != 0;
            decode_lzw(&data, early_change)?
        }
        "ASCIIHexDecode" | "AHx" => decode_ascii_hex(&data)?,
        "ASCII85Decode" | "A85" => decode_ascii85(&data)?,
        "RunLengthDecode" | "RL" => decode_run_length(&data)?,
        other => {
            return Err(PDFError::stream(format!("unsupported filter: {}", other)));
        }
    };

    // Predictors apply to Flate and LZW output
    let predictor = parms_usize(parms, "Predictor", 1);
    if predictor >= 10 && matches!(name, "FlateDecode" | "Fl" | "LZWDecode" | "LZW") {
        let columns = parms_usize(parms, "Columns", 1);
        let colors = parms_usize(parms, "Colors", 1);
        let bits = parms_usize(parms, "BitsPerComponent", 8);
        return decode_png_predictor(&decoded, colors, bits, columns);
    }
    if predictor == 2 {
        log::debug!("TIFF predictor 2 not applied");
    }

    Ok(decoded)
}

/// Decodes a stream body through its full filter chain.
///
/// `filter` is /Filter (a name or an array of names), `decode_parms` is
/// /DecodeParms (a dict, or an array parallel to the filter array).
/// Filters compose left to right. A trailing image codec leaves the data
/// as-is.
pub fn decode_stream(
    data: &[u8],
    filter: Option<&PDFObject>,
    decode_parms: Option<&PDFObject>,
) -> PDFResult<Vec<u8>> {
    let filter_names: Vec<String> = match filter {
        None | Some(PDFObject::Null) => return Ok(data.to_vec()),
        Some(PDFObject::Name(name)) => vec![name.clone()],
        Some(PDFObject::Array(arr)) => arr
            .iter()
            .filter_map(|item| item.as_name().map(str::to_owned))
            .collect(),
        Some(other) => {
            return Err(PDFError::stream(format!(
                "/Filter is neither a name nor an array: {:?}",
                other
            )));
        }
    };

    let stage_parms = |index: usize| -> Option<&Dict> {
        match decode_parms {
            Some(PDFObject::Dictionary(dict)) if index == 0 => Some(dict),
            Some(PDFObject::Array(arr)) => arr.get(index).and_then(|obj| obj.as_dict()),
            _ => None,
        }
    };

    let mut current = data.to_vec();
    for (i, name) in filter_names.iter().enumerate() {
        if is_image_filter(name) {
            log::debug!("leaving {} payload undecoded", name);
            break;
        }
        current = apply_one(current, name, stage_parms(i))?;
    }

    Ok(current)
}

/// Decodes the body of a parsed stream object using its own dictionary.
pub fn decode_stream_object(dict: &Dict, data: &[u8]) -> PDFResult<Vec<u8>> {
    decode_stream(data, dict.get("Filter"), dict.get("DecodeParms"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use smallvec::smallvec;
    use std::io::Write;

    fn flate(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_decode_flate_round_trip() {
        let original = b"Hello, PDF world! This is test data.";
        let decompressed = decode_flate(&flate(original)).unwrap();
        assert_eq!(&decompressed[..], original);
    }

    #[test]
    fn test_decode_flate_rejects_garbage() {
        assert!(decode_flate(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    }

    #[test]
    fn test_decode_ascii_hex() {
        assert_eq!(decode_ascii_hex(b"48656C6C6F").unwrap(), b"Hello");
        assert_eq!(decode_ascii_hex(b"48 65\n6C\t6C 6F>").unwrap(), b"Hello");
        // Odd nibble implies trailing zero
        assert_eq!(decode_ascii_hex(b"414").unwrap(), vec![0x41, 0x40]);
    }

    #[test]
    fn test_decode_ascii85() {
        assert_eq!(decode_ascii85(b"87cURD").unwrap(), b"Hell");
        assert_eq!(decode_ascii85(b"87cURD~>").unwrap(), b"Hell");
        assert_eq!(decode_ascii85(b"z").unwrap(), b"\0\0\0\0");
    }

    #[test]
    fn test_decode_ascii85_partial_group() {
        // "Hello" = 5 bytes: one full group plus a 2-character tail
        assert_eq!(decode_ascii85(b"87cURDZ~>").unwrap(), b"Hello");
    }

    #[test]
    fn test_decode_run_length() {
        // 2 -> copy 3 literals; 254 -> repeat next byte 3 times; 128 -> EOD
        let encoded = [2u8, b'a', b'b', b'c', 254, b'x', 128];
        assert_eq!(decode_run_length(&encoded).unwrap(), b"abcxxx");
    }

    #[test]
    fn test_decode_run_length_truncated() {
        assert!(decode_run_length(&[5, b'a']).is_err());
    }

    #[test]
    fn test_lzw_round_trip() {
        let original = b"ababababababababababab";
        let mut encoder =
            weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
        let encoded = encoder.encode(original).unwrap();
        assert_eq!(decode_lzw(&encoded, true).unwrap(), original);
    }

    #[test]
    fn test_png_predictor_up() {
        // Two rows of 3 bytes, both with the Up filter
        let data = [
            2, 10, 20, 30, // row 0: prev row is zeros
            2, 1, 1, 1, // row 1: adds to row 0
        ];
        let decoded = decode_png_predictor(&data, 1, 8, 3).unwrap();
        assert_eq!(decoded, vec![10, 20, 30, 11, 21, 31]);
    }

    #[test]
    fn test_png_predictor_sub() {
        let data = [1, 5, 5, 5];
        let decoded = decode_png_predictor(&data, 1, 8, 3).unwrap();
        assert_eq!(decoded, vec![5, 10, 15]);
    }

    #[test]
    fn test_decode_stream_no_filter() {
        let data = b"plain bytes";
        assert_eq!(decode_stream(data, None, None).unwrap(), data);
    }

    #[test]
    fn test_decode_stream_single_name() {
        let original = b"compressed content";
        let filter = PDFObject::Name("FlateDecode".into());
        let decoded = decode_stream(&flate(original), Some(&filter), None).unwrap();
        assert_eq!(&decoded[..], original);
    }

    #[test]
    fn test_decode_stream_chain_left_to_right() {
        // Body is hex(flate(data)): ASCIIHexDecode runs first, then Flate
        let original = b"chained filters";
        let compressed = flate(original);
        let hex: String = compressed.iter().map(|b| format!("{:02X}", b)).collect();

        let filter = PDFObject::Array(smallvec![
            Box::new(PDFObject::Name("ASCIIHexDecode".into())),
            Box::new(PDFObject::Name("FlateDecode".into())),
        ]);

        let decoded = decode_stream(hex.as_bytes(), Some(&filter), None).unwrap();
        assert_eq!(&decoded[..], original);
    }

    #[test]
    fn test_decode_stream_image_codec_passthrough() {
        let payload = b"\xff\xd8jpeg-ish";
        let filter = PDFObject::Name("DCTDecode".into());
        let decoded = decode_stream(payload, Some(&filter), None).unwrap();
        assert_eq!(&decoded[..], payload);
    }

    #[test]
    fn test_predictor_via_decode_parms() {
        // Row data with Up filter, flate-compressed, predictor 12
        let rows = [2u8, 10, 20, 30, 2, 1, 1, 1];
        let compressed = flate(&rows);

        let filter = PDFObject::Name("FlateDecode".into());
        let mut parms = Dict::new();
        parms.insert("Predictor".into(), PDFObject::Integer(12));
        parms.insert("Columns".into(), PDFObject::Integer(3));
        let parms = PDFObject::Dictionary(parms);

        let decoded = decode_stream(&compressed, Some(&filter), Some(&parms)).unwrap();
        assert_eq!(decoded, vec![10, 20, 30, 11, 21, 31]);
    }
}
