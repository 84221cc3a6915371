use rand::Rng;

use crate::Result;

/// Decoding budget and sampling parameters for one generation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
  pub max_new_tokens: usize,
  /// Zero means greedy decoding
  pub temperature: f32,
  /// Nucleus mass kept before sampling
  pub top_p: f32,
}

/// A language model that can be fed tokens incrementally
pub trait CausalDecoder {
  /// Append `tokens` to the running sequence and return the logits
  /// for the token that follows
  fn step(&mut self, tokens: &[u32]) -> Result<Vec<f32>>;
}

/// Sample continuation tokens after `prompt` until an end token or the budget.
///
/// End tokens are not included in the output.
pub fn decode<R: Rng>(
  decoder: &mut dyn CausalDecoder,
  prompt: &[u32],
  eos: &[u32],
  params: &SamplingParams,
  rng: &mut R,
) -> Result<Vec<u32>> {
  let mut generated = Vec::new();
  if params.max_new_tokens == 0 {
    return Ok(generated);
  }

  let mut logits = decoder.step(prompt)?;
  loop {
    let token = sample_token(&logits, params, rng) as u32;
    if eos.contains(&token) {
      break;
    }
    generated.push(token);
    if generated.len() >= params.max_new_tokens {
      break;
    }
    logits = decoder.step(&[token])?;
  }
  Ok(generated)
}

/// Pick the next token from `logits` with temperature and nucleus sampling
pub fn sample_token<R: Rng>(logits: &[f32], params: &SamplingParams, rng: &mut R) -> usize {
  if logits.is_empty() {
    return 0;
  }
  if params.temperature <= 0.0 {
    return argmax(logits);
  }

  let probs = softmax(logits, params.temperature);
  let mut order: Vec<usize> = (0..probs.len()).collect();
  order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

  let mut nucleus = Vec::new();
  let mut mass = 0.0f32;
  for index in order {
    nucleus.push(index);
    mass += probs[index];
    if mass >= params.top_p {
      break;
    }
  }

  let mut target = rng.random::<f32>() * mass;
  for &index in &nucleus {
    target -= probs[index];
    if target <= 0.0 {
      return index;
    }
  }
  nucleus.last().copied().unwrap_or(0)
}

fn argmax(values: &[f32]) -> usize {
  values
    .iter()
    .enumerate()
    .max_by(|(_, a), (_, b)| a.total_cmp(b))
    .map(|(index, _)| index)
    .unwrap_or(0)
}

fn softmax(logits: &[f32], temperature: f32) -> Vec<f32> {
  let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = logits.iter().map(|&l| ((l - max) / temperature).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  const GREEDY: SamplingParams = SamplingParams { max_new_tokens: 8, temperature: 0.0, top_p: 1.0 };

  /// Emits a scripted token sequence, one per step
  struct Scripted {
    script: Vec<u32>,
    steps: Vec<Vec<u32>>,
    vocab: usize,
  }

  impl CausalDecoder for Scripted {
    fn step(&mut self, tokens: &[u32]) -> Result<Vec<f32>> {
      self.steps.push(tokens.to_vec());
      let next = self.script.get(self.steps.len() - 1).copied().unwrap_or(0);
      let mut logits = vec![0.0; self.vocab];
      logits[next as usize] = 10.0;
      Ok(logits)
    }
  }

  #[test]
  fn test_decode_stops_at_end_token() -> Result<()> {
    let mut decoder = Scripted { script: vec![4, 5, 2, 6], steps: vec![], vocab: 8 };
    let mut rng = StdRng::seed_from_u64(7);

    let tokens = decode(&mut decoder, &[1, 3], &[2], &GREEDY, &mut rng)?;
    assert_eq!(tokens, vec![4, 5]);
    assert_eq!(decoder.steps, vec![vec![1, 3], vec![4], vec![5]]);
    Ok(())
  }

  #[test]
  fn test_decode_respects_token_budget() -> Result<()> {
    let mut decoder = Scripted { script: vec![3; 20], steps: vec![], vocab: 8 };
    let mut rng = StdRng::seed_from_u64(7);
    let params = SamplingParams { max_new_tokens: 3, ..GREEDY };

    let tokens = decode(&mut decoder, &[1], &[2], &params, &mut rng)?;
    assert_eq!(tokens.len(), 3);
    assert_eq!(decoder.steps.len(), 3);
    Ok(())
  }

  #[test]
  fn test_small_top_p_keeps_only_the_best_token() {
    let mut rng = StdRng::seed_from_u64(1);
    let params = SamplingParams { max_new_tokens: 1, temperature: 0.7, top_p: 0.1 };
    let logits = [0.0, 5.0, 1.0, 4.5];

    for _ in 0..50 {
      assert_eq!(sample_token(&logits, &params, &mut rng), 1);
    }
  }

  #[test]
  fn test_sampling_stays_inside_the_nucleus() {
    let mut rng = StdRng::seed_from_u64(3);
    let params = SamplingParams { max_new_tokens: 1, temperature: 1.0, top_p: 0.9 };
    // tokens 0 and 3 carry almost all the mass
    let logits = [6.0, -8.0, -8.0, 6.0];

    for _ in 0..100 {
      let token = sample_token(&logits, &params, &mut rng);
      assert!(token == 0 || token == 3);
    }
  }

  #[test]
  fn test_softmax_sums_to_one() {
    let probs = softmax(&[1.0, 2.0, 3.0], 0.7);
    assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    assert!(probs[2] > probs[1] && probs[1] > probs[0]);
  }
}
