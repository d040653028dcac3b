//! Sample-rate conversion with rubato's sinc resampler

use crate::error::{Error, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const CHUNK_SIZE: usize = 1024;

fn resample_error(e: impl std::fmt::Display) -> Error {
    Error::input(format!("resampling failed: {}", e))
}

/// Resample mono audio from `from_rate` to `to_rate`.
///
/// The output has `ceil(len * to_rate / from_rate)` samples and is aligned
/// with the input: the filter delay is trimmed off the front.
pub fn resample_to_target(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == 0 || to_rate == 0 {
        return Err(Error::input(format!(
            "cannot resample from {} Hz to {} Hz",
            from_rate, to_rate
        )));
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, 1).map_err(resample_error)?;

    let delay = resampler.output_delay();
    let expected = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(expected + delay + CHUNK_SIZE);

    let mut chunks = samples.chunks_exact(CHUNK_SIZE);
    for chunk in &mut chunks {
        let out = resampler.process(&[chunk], None).map_err(resample_error)?;
        output.extend_from_slice(&out[0]);
    }

    let rest = chunks.remainder();
    if !rest.is_empty() {
        let out = resampler
            .process_partial(Some(&[rest]), None)
            .map_err(resample_error)?;
        output.extend_from_slice(&out[0]);
    }

    // Flush the filter tail
    while output.len() < expected + delay {
        let out = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(resample_error)?;
        if out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&out[0]);
    }

    log::debug!(
        "Resampled {} samples at {} Hz to {} samples at {} Hz",
        samples.len(),
        from_rate,
        expected,
        to_rate
    );

    Ok(output.into_iter().skip(delay).take(expected).collect())
}
