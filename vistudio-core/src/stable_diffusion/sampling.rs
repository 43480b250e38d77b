use anyhow::Result;
use candle_core::{Device, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Draws the initial latents on the host from a seeded RNG, so a seed maps to
/// the same noise on every device.
pub fn seeded_noise(
    seed: u64,
    (batch, channels, height, width): (usize, usize, usize, usize),
    device: &Device,
) -> Result<Tensor> {
    let mut rng = StdRng::seed_from_u64(seed);
    let len = batch * channels * height * width;
    let values: Vec<f32> = (0..len).map(|_| rng.sample(StandardNormal)).collect();
    let noise = Tensor::from_vec(values, (batch, channels, height, width), &Device::Cpu)?;
    Ok(noise.to_device(device)?)
}

/// Fits CLIP token ids to exactly `max_len`, truncating (keeping the final
/// end-of-text token) or padding with `pad_id`.
pub fn fit_tokens(mut tokens: Vec<u32>, max_len: usize, pad_id: u32) -> Vec<u32> {
    if tokens.len() > max_len {
        let last = tokens[tokens.len() - 1];
        tokens.truncate(max_len - 1);
        tokens.push(last);
    }
    tokens.resize(max_len, pad_id);
    tokens
}

/// Classifier-free guidance over a batch of `[unconditional, conditional]` predictions.
pub fn apply_guidance(noise_pred: &Tensor, guidance: f64) -> Result<Tensor> {
    let chunks = noise_pred.chunk(2, 0)?;
    let (uncond, text) = (&chunks[0], &chunks[1]);
    Ok((uncond + ((text - uncond)? * guidance)?)?)
}
