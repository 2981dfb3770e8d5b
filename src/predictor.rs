//! Horizontal-differencing predictor (§4.5 "Predictor"; TIFF tag `Predictor
//! == 2`), applied in place to a decompressed row.
//!
//! Grounded on the horizontal-predictor arithmetic in the teacher decoder
//! (`rev_hpredict_nsamp`): the inverse is a running sum, `samples` apart,
//! computed natively in whatever byte order the row is already in - the
//! predictor undoes differencing between same-component samples, it does
//! not itself care about endianness. Only the integer predictor (code 2)
//! is implemented; floating-point prediction (code 3) is not part of this
//! engine's scope.

/// Undo horizontal differencing across one decompressed row in place.
///
/// `bits_per_sample` must be 8, 16, or 32; `samples_per_pixel` is the
/// number of interleaved components per pixel (the predictor differences
/// each component against the same component `samples_per_pixel` pixels
/// back - i.e. `byte_stride = samples_per_pixel * bytes_per_sample`).
pub fn unpredict_horizontal(row: &mut [u8], bits_per_sample: u16, samples_per_pixel: usize) {
    match bits_per_sample {
        8 => {
            for i in samples_per_pixel..row.len() {
                row[i] = row[i].wrapping_add(row[i - samples_per_pixel]);
            }
        }
        16 => {
            let stride = samples_per_pixel * 2;
            for i in (stride..row.len()).step_by(2) {
                let v = u16::from_ne_bytes(row[i..i + 2].try_into().unwrap());
                let p = u16::from_ne_bytes(row[i - stride..i - stride + 2].try_into().unwrap());
                row[i..i + 2].copy_from_slice(&v.wrapping_add(p).to_ne_bytes());
            }
        }
        32 => {
            let stride = samples_per_pixel * 4;
            for i in (stride..row.len()).step_by(4) {
                let v = u32::from_ne_bytes(row[i..i + 4].try_into().unwrap());
                let p = u32::from_ne_bytes(row[i - stride..i - stride + 4].try_into().unwrap());
                row[i..i + 4].copy_from_slice(&v.wrapping_add(p).to_ne_bytes());
            }
        }
        _ => {
            // Unsupported bit depths for the predictor are left untouched;
            // the parser only calls this for depths it has validated.
        }
    }
}

/// Apply horizontal differencing across one row in place (the writer's
/// encode-side counterpart of [`unpredict_horizontal`]).
pub fn predict_horizontal(row: &mut [u8], bits_per_sample: u16, samples_per_pixel: usize) {
    match bits_per_sample {
        8 => {
            for i in (samples_per_pixel..row.len()).rev() {
                row[i] = row[i].wrapping_sub(row[i - samples_per_pixel]);
            }
        }
        16 => {
            let stride = samples_per_pixel * 2;
            let mut i = row.len();
            while i > stride {
                i -= 2;
                let v = u16::from_ne_bytes(row[i..i + 2].try_into().unwrap());
                let p = u16::from_ne_bytes(row[i - stride..i - stride + 2].try_into().unwrap());
                row[i..i + 2].copy_from_slice(&v.wrapping_sub(p).to_ne_bytes());
            }
        }
        32 => {
            let stride = samples_per_pixel * 4;
            let mut i = row.len();
            while i > stride {
                i -= 4;
                let v = u32::from_ne_bytes(row[i..i + 4].try_into().unwrap());
                let p = u32::from_ne_bytes(row[i - stride..i - stride + 4].try_into().unwrap());
                row[i..i + 4].copy_from_slice(&v.wrapping_sub(p).to_ne_bytes());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizontal_round_trip_u8() {
        let original = vec![10u8, 20, 30, 5, 15, 25];
        let mut encoded = original.clone();
        predict_horizontal(&mut encoded, 8, 3);
        unpredict_horizontal(&mut encoded, 8, 3);
        assert_eq!(encoded, original);
    }

    #[test]
    fn horizontal_round_trip_u16() {
        let original: Vec<u8> = [100u16, 200, 300, 150]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        let mut encoded = original.clone();
        predict_horizontal(&mut encoded, 16, 2);
        unpredict_horizontal(&mut encoded, 16, 2);
        assert_eq!(encoded, original);
    }
}
